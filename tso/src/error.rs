use thiserror::Error;

#[derive(Error, Debug)]
pub enum TsoError {
    #[error("get allocator failed, {0}")]
    GetAllocator(String),
    #[error("requested {0} allocator is not the leader")]
    NotLeader(String),
    #[error("campaign leader meets conflict, the leader key is already held")]
    CampaignConflict,
}
