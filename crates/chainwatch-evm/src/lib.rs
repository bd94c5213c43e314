//! chainwatch-evm: EVM chain gateway, Transfer decoder and builder.

pub mod builder;
pub mod rpc;
pub mod signature;
pub mod transfer;

pub use builder::IndexerBuilder;
pub use rpc::{JsonRpcGateway, RawLog, RpcConfig};
pub use signature::{event_topic, TRANSFER_SIGNATURE};
pub use transfer::TransferDecoder;
