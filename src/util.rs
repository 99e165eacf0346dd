//! Shared utility modules used across segrank components.

pub mod score;
pub mod varint;
