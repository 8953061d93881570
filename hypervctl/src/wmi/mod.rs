//! WMI/COM access to the Hyper-V provider (Windows only).

mod connection;
mod transport;

pub use connection::{
    ConnectionConfig, Credentials, WbemClassObjectExt, WmiConnection, HYPERV_NAMESPACE,
};
pub use transport::WmiTransport;
