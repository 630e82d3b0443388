use tokio::sync::mpsc::{error::TryRecvError, Receiver};

/// Thin wrapper around a [`Receiver`] that can peek the next item without
/// consuming it.
///
/// The polling encoder uses it to check whether the next packet batch still
/// fits in the payload budget; a batch that does not fit stays queued for the
/// next poll cycle.
#[derive(Debug)]
pub struct PeekableReceiver<T> {
    rx: Receiver<T>,
    next: Option<T>,
}

impl<T> PeekableReceiver<T> {
    pub fn new(rx: Receiver<T>) -> Self {
        Self { rx, next: None }
    }

    pub fn peek(&mut self) -> Option<&T> {
        if self.next.is_none() {
            self.next = self.rx.try_recv().ok();
        }
        self.next.as_ref()
    }

    pub async fn recv(&mut self) -> Option<T> {
        match self.next.take() {
            Some(item) => Some(item),
            None => self.rx.recv().await,
        }
    }

    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        match self.next.take() {
            Some(item) => Ok(item),
            None => self.rx.try_recv(),
        }
    }

    pub fn close(&mut self) {
        self.rx.close()
    }
}

#[cfg(test)]
mod tests {
    use super::PeekableReceiver;
    use crate::packet::Packet;
    use tokio::sync::mpsc::channel;

    #[tokio::test]
    async fn peek_does_not_consume() {
        let (tx, rx) = channel(1);
        let mut rx = PeekableReceiver::new(rx);

        assert!(rx.peek().is_none());

        tx.send(Packet::Ping).await.unwrap();
        assert_eq!(rx.peek(), Some(&Packet::Ping));
        assert_eq!(rx.peek(), Some(&Packet::Ping));
        assert_eq!(rx.recv().await, Some(Packet::Ping));
        assert!(rx.peek().is_none());

        tx.send(Packet::Pong).await.unwrap();
        assert_eq!(rx.peek(), Some(&Packet::Pong));
        assert_eq!(rx.try_recv().unwrap(), Packet::Pong);
        assert!(rx.try_recv().is_err());
    }
}
