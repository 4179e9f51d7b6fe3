#![allow(dead_code)]

pub mod held_origin;
pub mod range_server;
pub mod socket_guard;
