//! External collaborators: collection nodes, the directory service and the
//! mail server.

pub mod directory;
pub mod html;
pub mod node;
pub mod notify;
pub mod tls;
