//! Seams to the channel-establishment collaborator.
//!
//! The transfer protocol does not establish connections. It runs over
//! whatever [`PeerChannel`] a [`Connector`] (sending side) or an acceptor
//! (receiving side) hands it.

use std::future::Future;

use crate::error::ChannelError;
use crate::protocol::WireMessage;

/// What a channel reports from `recv`.
#[derive(Debug)]
pub enum ChannelEvent {
    /// The channel is usable. Reported once, before any data.
    Open,
    Data(WireMessage),
    /// The peer went away. Every later `recv` reports this again.
    Closed,
    Error(ChannelError),
}

/// A direct point-to-point channel to one peer.
///
/// Implementations must be **ordered and reliable**: every message handed to
/// `send` arrives exactly once, intact, in send order, or the channel reports
/// `Closed`/`Error`. Chunks carry no sequence numbers, so running a session
/// over a lossy or reordering transport silently corrupts the payload.
pub trait PeerChannel: Send {
    /// Hand one message to the channel.
    fn send(
        &mut self,
        message: WireMessage,
    ) -> impl Future<Output = Result<(), ChannelError>> + Send;

    /// Wait for the next event.
    fn recv(&mut self) -> impl Future<Output = ChannelEvent> + Send;

    fn is_open(&self) -> bool;

    /// Close our side. Queued messages are still delivered; no further
    /// sends succeed.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Opens channels to peers by endpoint identifier.
pub trait Connector: Send + Sync {
    type Channel: PeerChannel + 'static;

    fn open(
        &self,
        target: &str,
    ) -> impl Future<Output = Result<Self::Channel, ChannelError>> + Send;
}
