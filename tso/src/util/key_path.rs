use crate::util::constant::Constant;

pub struct KeyPath;

impl KeyPath {
    pub fn root_path(cluster_id: u64) -> String {
        format!("{}/{}", Constant::ROOT_PATH, cluster_id)
    }

    /// Storage path of an allocator's timestamp save point. For backward
    /// compatibility the global timestamp keeps the bare root key.
    pub fn allocator_path(root_path: &str, dc_location: &str) -> String {
        if dc_location == Constant::GLOBAL_DC_LOCATION {
            root_path.to_owned()
        } else {
            format!("{}/{}", root_path, dc_location)
        }
    }

    /// Election key of a dc-location's local allocator leader.
    pub fn allocator_leader_path(root_path: &str, dc_location: &str) -> String {
        format!("{}/leader", Self::allocator_path(root_path, dc_location))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_keeps_the_root_key() {
        let root = KeyPath::root_path(7);
        assert_eq!(root, "/tso/7");
        assert_eq!(
            KeyPath::allocator_path(&root, Constant::GLOBAL_DC_LOCATION),
            "/tso/7"
        );
        assert_eq!(KeyPath::allocator_path(&root, "dc-1"), "/tso/7/dc-1");
        assert_eq!(
            KeyPath::allocator_leader_path(&root, "dc-1"),
            "/tso/7/dc-1/leader"
        );
    }
}
