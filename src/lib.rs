//! # pbap-client
//!
//! An async OBEX/GOEP client engine and a Phone Book Access (PBAP) client
//! profile built on top of it.
//!
//! ## Features
//!
//! - Async/await based API using Tokio
//! - Single-consumer message bus serializing every state change
//! - Multiplexed GOEP connections with Single Response Mode
//! - Event-driven reporting of every phone book operation
//! - Pluggable transport and service discovery
//!
//! ## Quick Start
//!
//! ```no_run
//! use pbap_client::{
//!     BdAddr, OpenOptions, PbapClient, PseRecord, SerialConfig, SetPathFlag, StackConfig,
//!     StaticSdp,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), pbap_client::Error> {
//!     let phone: BdAddr = "00:1A:7D:DA:71:13".parse()?;
//!     let sdp = StaticSdp::new().with_peer(phone, PseRecord::rfcomm(19));
//!     let serial = SerialConfig::new().bind(phone, "/dev/rfcomm0");
//!     let client = PbapClient::serial(StackConfig::default(), serial, Box::new(sdp));
//!
//!     client.enable().await?;
//!     let conn = client.open(phone, OpenOptions::default()).await?;
//!
//!     client
//!         .set_phone_book(conn.handle, SetPathFlag::Down, Some("telecom"))
//!         .await?;
//!     let book = client.pull_phone_book(conn.handle, "telecom/pb.vcf", None).await?;
//!     println!("{}", String::from_utf8_lossy(&book.data));
//!
//!     client.close(conn.handle).await?;
//!     client.disable().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`protocol`] - OBEX packets, headers, framing and application parameters
//! - [`bus`] - Bounded message queue with per-component handlers
//! - [`goep`] - Connection table and request/response engine
//! - [`pba`] - Phone book client state machine
//! - [`sdp`] - Service discovery seam
//! - [`transport`] - Transport seam and the serial implementation
//! - [`event`] - Event fan-out to the application
//! - [`client`] - High-level [`PbapClient`]

pub mod bus;
pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod goep;
pub mod pba;
pub mod protocol;
pub mod sdp;
pub mod stack;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use client::{Fragments, OpenOptions, PbapClient, Pulled};
pub use config::{BusConfig, StackConfig};
pub use error::{BusError, CodecError, Error, FrameError, GoepError, Result, SdpError};
pub use event::{ConnOpen, Event, EventDispatcher, EventFilter, EventKind, PullResponse, Subscription};
pub use pba::{PbaHandle, PbaRequest, SetPathFlag};
pub use protocol::{
    AppParams, PullPhoneBookParams, PullVCardEntryParams, PullVCardListingParams,
};
pub use sdp::{PseRecord, SdpClient, StaticSdp};
pub use transport::{ObexTransport, SerialConfig, SerialTransport};
pub use types::{BdAddr, PbaStatus, PbapFeatures, Repositories};
