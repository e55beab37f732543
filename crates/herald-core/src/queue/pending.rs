//! PendingResult - 一度だけ解決される完了ハンドル

use std::future::{Future, IntoFuture};
use std::pin::Pin;

use tokio::sync::oneshot;

use super::Response;
use crate::error::HeraldError;

/// The submitter's side of a task. Await it (or call [`wait`](Self::wait)) to get
/// the result.
///
/// If the worker disappears without answering, the result is `HeraldError::Shutdown`,
/// so a pending result never hangs once the queue is gone.
#[derive(Debug)]
pub struct PendingResult<T = Response> {
    rx: oneshot::Receiver<Result<Response, HeraldError>>,
    extract: fn(Response) -> Result<T, HeraldError>,
}

impl PendingResult<Response> {
    pub(crate) fn new(rx: oneshot::Receiver<Result<Response, HeraldError>>) -> Self {
        Self { rx, extract: Ok }
    }

    /// Narrow the response to the variant a façade operation expects.
    pub(crate) fn narrow<T>(
        self,
        extract: fn(Response) -> Result<T, HeraldError>,
    ) -> PendingResult<T> {
        PendingResult {
            rx: self.rx,
            extract,
        }
    }
}

impl<T> PendingResult<T> {
    pub async fn wait(self) -> Result<T, HeraldError> {
        match self.rx.await {
            Ok(Ok(response)) => (self.extract)(response),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(HeraldError::Shutdown),
        }
    }
}

impl<T: Send + 'static> IntoFuture for PendingResult<T> {
    type Output = Result<T, HeraldError>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ResolvedChannel;

    #[tokio::test]
    async fn dropped_sender_resolves_as_shutdown() {
        let (tx, rx) = oneshot::channel();
        let pending = PendingResult::new(rx);
        drop(tx);
        assert_eq!(pending.wait().await, Err(HeraldError::Shutdown));
    }

    #[tokio::test]
    async fn narrow_rejects_the_wrong_variant() {
        let (tx, rx) = oneshot::channel();
        let pending = PendingResult::new(rx).narrow(|response| match response {
            Response::Messages(messages) => Ok(messages),
            _ => Err(HeraldError::UnexpectedResponse),
        });
        tx.send(Ok(Response::Channel(ResolvedChannel {
            channel_id: 1,
            username: None,
        })))
        .unwrap();
        assert_eq!(pending.await, Err(HeraldError::UnexpectedResponse));
    }
}
