use async_trait::async_trait;

/// A WebSocket connection, stripped down to the two operations `ClientSession`
/// needs. Keeps this crate's session state machine testable without a real
/// socket; the root binary implements this over `axum`'s `WebSocket`.
#[async_trait]
pub trait ClientTransport: Send {
    /// The next text frame, or `None` once the connection has closed.
    async fn recv(&mut self) -> Option<String>;

    /// Send one text frame. Returns `false` if the connection is gone.
    async fn send(&mut self, text: String) -> bool;
}
