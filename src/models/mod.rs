pub mod link;

pub use link::{
    BatchItem, ResultItem, ShortLink, ShortenRequest, ShortenResponse, Shortened, UserUrl,
};
