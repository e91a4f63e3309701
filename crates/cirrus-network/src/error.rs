//! Network management error types

use ipnet::Ipv4Net;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Invalid IPv4 CIDR: {0}")]
    InvalidCidr(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Existing subnet {existing} has overlap with: {requested}")]
    Overlap {
        existing: Ipv4Net,
        requested: Ipv4Net,
    },

    #[error("Subnet {child} is not within cidr: {parent}")]
    NotContained { child: Ipv4Net, parent: Ipv4Net },

    #[error("In use: {0}")]
    InUse(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("No source NAT IP addresses found for network: {0}")]
    NoSourceNatIp(String),

    #[error("Firewall rule conflict: {0}")]
    RuleConflict(String),

    #[error("Not supported: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Cloud(#[from] cirrus_cloud::CloudError),
}

pub type Result<T> = std::result::Result<T, NetworkError>;
