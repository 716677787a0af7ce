//! Integration tests for bucketsync

mod cli_parse;
mod cluster;
mod restart;
mod tcp_node;
