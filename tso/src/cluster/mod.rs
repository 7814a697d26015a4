mod leadership;
mod leadership_impl_mem;
mod lease;
mod participant;

pub use leadership::{AlwaysLeader, TsoLeadership};
pub use leadership_impl_mem::{ElectionBoard, MemLeadership};
pub use lease::Lease;
pub use participant::{Participant, ParticipantInfo};
