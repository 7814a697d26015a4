use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Member identity used in election keys and log context.
pub struct Participant {
    member: ParticipantInfo,
    /// serialized `member`; written as the leader value on a successful
    /// campaign so every observer can tell who holds the key
    member_value: String,
}

impl Participant {
    pub fn new(name: &str) -> Participant {
        let member = ParticipantInfo::new(name, generate_unique_id(name));
        let member_value =
            serde_json::to_string(&member).expect("serialize participant info can't fail");
        Self {
            member,
            member_value,
        }
    }

    pub fn get_name(&self) -> &str {
        self.member.name()
    }

    pub fn member(&self) -> &ParticipantInfo {
        &self.member
    }

    pub fn member_value(&self) -> &str {
        &self.member_value
    }

    pub fn is_same(&self, other: &ParticipantInfo) -> bool {
        self.member.member_id() == other.member_id()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ParticipantInfo {
    name: String,
    /// unique among all participants
    member_id: u64,
}

impl ParticipantInfo {
    pub fn new(name: &str, member_id: u64) -> ParticipantInfo {
        Self {
            name: name.into(),
            member_id,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn member_id(&self) -> u64 {
        self.member_id
    }
}

/// stable id derived from the node name
fn generate_unique_id(seed: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(seed);
    let digest = hasher.finalize();

    let mut buf = [0; 8];
    buf.copy_from_slice(&digest[..8]);
    LittleEndian::read_u64(&buf)
}
