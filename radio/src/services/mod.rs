pub mod blob_store;
pub mod click_notifier;
pub mod favorites;
pub mod fingerprint;
pub mod hls_proxy;
pub mod normalize;
pub mod redis_store;
pub mod refresh;
pub mod stream_validator;
pub mod upstream_directory;
pub mod validation_cache;
