//! Content descriptor resolution

pub mod resolver;

pub use resolver::{
    decode_base64, decode_data_uri, download_url, write_source, ContentSource,
    DOWNLOAD_CHUNK_SIZE,
};
