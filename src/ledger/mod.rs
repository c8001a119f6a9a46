//! Governance Ledger
//!
//! Tamper-evident block log for audit records: Lamport sequencing,
//! content hashing, Merkle roots, threshold-triggered block formation
//! and on-demand verification of blocks and receipt chains.

pub mod block;
pub mod former;
pub mod hash;
pub mod lamport;
pub mod merkle;
pub mod receipt;
pub mod receipt_log;
pub mod record;
pub mod verify;

pub use block::{Block, BlockData};
pub use former::BlockFormer;
pub use hash::{hash_block, hash_receipt, GENESIS_PREVIOUS_HASH, HASH_CONTRACT_VERSION};
pub use lamport::{LamportCheck, LamportSequencer, LamportViolation, MAX_LAMPORT};
pub use merkle::{merkle_root, MerkleProof, MerkleTree};
pub use receipt::{Receipt, ReceiptChain};
pub use receipt_log::{load_receipts_from_file, ReceiptLog};
pub use record::{AuditRecord, NewAuditRecord, OrgId};
pub use verify::{ChainVerifier, ReceiptCheck, VerificationReport};
