//! osclink Peer
//!
//! Connects the routing engine to a socket:
//! - **TCP** with OSC 1.0 length-prefix or OSC 1.1 SLIP framing
//! - **UDP** with one packet per datagram
//!
//! # Example
//!
//! ```no_run
//! use osclink_core::Message;
//! use osclink_peer::{Peer, PeerConfig};
//! use osclink_router::CallOptions;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let peer = Peer::connect(PeerConfig::tcp("127.0.0.1:9000".parse()?))?;
//!     peer.dispatcher().add_handler("/meter/*", |msg| println!("{:?}", msg));
//!     peer.start_listening()?;
//!
//!     peer.send_message(&Message::new("/mixer/1/gain").with_arg(0.8f32))?;
//!     let version = peer
//!         .call_handler()
//!         .call(&Message::new("/version"), CallOptions::default())?;
//!     println!("{:?}", version);
//!
//!     peer.stop_listening();
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod error;
pub mod framing;
pub mod peer;

pub use error::{PeerError, Result};
pub use framing::{FrameDecoder, Framing};
pub use peer::{Peer, PeerConfig, PeerEvent, PeerMode};
