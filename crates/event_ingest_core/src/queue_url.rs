use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueUrlError {
    #[error("could not determine account id from queue arn {0:?}")]
    MissingAccount(String),
    #[error("queue arn {0:?} has no queue name")]
    MissingQueueName(String),
    #[error("message carries no region for queue arn {0:?}")]
    MissingRegion(String),
}

/// Derives the queue URL from an `arn:aws:sqs:<region>:<account>:<queue>` source ARN.
/// The region comes from the message record rather than the ARN.
pub fn queue_url_from_source_arn(arn: &str, region: &str) -> Result<String, QueueUrlError> {
    let parts: Vec<&str> = arn.split(':').collect();
    let account = parts
        .get(4)
        .filter(|account| !account.is_empty())
        .ok_or_else(|| QueueUrlError::MissingAccount(arn.to_string()))?;
    let queue_name = parts
        .last()
        .filter(|name| parts.len() > 5 && !name.is_empty())
        .ok_or_else(|| QueueUrlError::MissingQueueName(arn.to_string()))?;
    if region.trim().is_empty() {
        return Err(QueueUrlError::MissingRegion(arn.to_string()));
    }

    Ok(format!(
        "https://sqs.{region}.amazonaws.com/{account}/{queue_name}"
    ))
}
