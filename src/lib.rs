//! AirPouch - CouchDB/PouchDB persistence adapter
//! Library crate shared by the CLI and embedding applications

pub mod engine;
