//! Magos Dominus CLI library.

pub mod commands;
