mod url;

pub use url::{
    BatchShortenRequest, BatchShortenResponse, ShortUrl, ShortenRequest, ShortenResponse, UserUrl,
};
