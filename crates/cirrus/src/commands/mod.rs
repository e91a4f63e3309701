pub mod allocation;
pub mod controller;
pub mod firewall;
pub mod subnet;
