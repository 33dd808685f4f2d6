pub use self::epoll::{Epoll, Events};
pub use self::eventfd::EventFd;
pub use self::fd::FileDesc;

mod epoll;
mod eventfd;
mod fd;

pub use std::io;
