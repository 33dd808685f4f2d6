//! Runtime core for a multi-protocol network server: a single-threaded,
//! poll-driven event loop, an HPACK header compressor, and a TLS session
//! engine built around two in-memory buffers pumped against a streaming
//! crypto library.
//!
//! The event loop, HTTP/1.1 parsing, HTTP/2 framing, WebSocket framing and
//! proxy demultiplexing that sit on top of this crate in a full server are
//! out of scope here; this crate only provides the pieces those layers are
//! built from.
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! kuma-core = "0.1"
//! ```
//!
//! # Example
//!
//! ```no_run
//! use kuma_core::{EventLoop, Ready};
//! use kuma_core::net::tcp::TcpListener;
//! use std::os::unix::io::AsRawFd;
//!
//! let addr = "127.0.0.1:0".parse().unwrap();
//! let listener = TcpListener::bind(&addr).unwrap();
//!
//! let event_loop = EventLoop::new().unwrap();
//! let fd = listener.as_raw_fd();
//! event_loop
//!     .register(fd, Ready::readable(), Box::new(move |_ready| {
//!         let _ = listener.accept();
//!     }))
//!     .unwrap();
//!
//! event_loop.stop();
//! event_loop.run().unwrap();
//! ```

mod delay_queue;
pub mod epoll;
pub mod error;
pub mod event_loop;
pub mod hpack;
pub mod net;
mod sys;
mod task;
mod task_queue;
pub mod tls;
pub mod token;
mod waker;

pub use epoll::{Epoll, EpollOpt, Event, Events, Ready};
pub use error::{CoreError, CoreResult};
pub use event_loop::{EventLoop, RegistrationId};
pub use token::Token;
pub use waker::Waker;
