use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::HttpError;

const BODY_EXCERPT_LEN: usize = 512;

/// Races `fut` against the token; cancellation wins and drops the in-flight request.
pub(crate) async fn cancellable<F, T>(cancel: &CancellationToken, fut: F) -> Result<T, HttpError>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(HttpError::Cancelled),
        out = fut => Ok(out),
    }
}

/// Reads an error body for the log without pulling megabytes into memory.
pub(crate) async fn body_excerpt(cancel: &CancellationToken, resp: reqwest::Response) -> String {
    let text = match cancellable(cancel, resp.text()).await {
        Ok(Ok(text)) => text,
        _ => return String::new(),
    };
    match text.char_indices().nth(BODY_EXCERPT_LEN) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancelled_token_wins() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let out = cancellable(&cancel, std::future::pending::<()>()).await;
        assert!(matches!(out, Err(HttpError::Cancelled)));
    }

    #[tokio::test]
    async fn test_completes_when_not_cancelled() {
        let cancel = CancellationToken::new();
        let out = cancellable(&cancel, async { 7 }).await.unwrap();
        assert_eq!(out, 7);
    }
}
