use thiserror::Error;

/// Problems building or freezing a tree.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TopologyError {
    #[error("parent body {parent} does not exist (tree has {bodies} bodies)")]
    UnknownParent { parent: usize, bodies: usize },

    #[error("tree topology is frozen; bodies can no longer be added")]
    Frozen,

    #[error("tree topology has not been frozen yet")]
    NotFrozen,

    #[error("mass properties of body {body} are not finite")]
    NonFiniteMass { body: usize },

    #[error("body {body} has negative mass {mass}")]
    NegativeMass { body: usize, mass: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_body() {
        let err = TopologyError::UnknownParent {
            parent: 7,
            bodies: 3,
        };
        assert_eq!(
            err.to_string(),
            "parent body 7 does not exist (tree has 3 bodies)"
        );
        let err = TopologyError::NegativeMass {
            body: 2,
            mass: -1.5,
        };
        assert!(err.to_string().contains("-1.5"));
    }
}
