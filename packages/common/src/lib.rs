pub mod storage;
pub mod transcode;
