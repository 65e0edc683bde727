#![forbid(unsafe_code)]

pub mod hash;
pub mod identity;
pub mod login;

pub mod sealed_box;
pub mod session_keys;
pub mod secretbox;

#[cfg(test)]
mod proptests;
