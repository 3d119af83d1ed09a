//! Property-based test generators using proptest.

use crate::fixtures::Network;
use graphsync_model::Field;
use graphsync_protocol::Scalar;
use proptest::prelude::*;

/// Strategy for scalars that compare equal to themselves (no NaN floats).
pub fn scalar_strategy() -> impl Strategy<Value = Scalar> {
    prop_oneof![
        1 => Just(Scalar::Null),
        2 => any::<bool>().prop_map(Scalar::Bool),
        3 => (-1000i64..1000).prop_map(Scalar::Integer),
        3 => "[a-z]{0,8}".prop_map(Scalar::Text),
    ]
}

/// Strategy for field names from a small pool, so edits collide often.
pub fn field_name_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["a", "b", "c", "title", "count"]).prop_map(str::to_string)
}

/// One step of an edit script.
#[derive(Debug, Clone)]
pub enum Edit {
    /// Set a field of a replica's root. Replica 0 is the server; peers
    /// follow.
    Set {
        /// Replica index.
        replica: usize,
        /// Field name.
        field: String,
        /// New value.
        value: Scalar,
    },
    /// Commit and deliver everything until the network is quiet.
    Settle,
}

impl Edit {
    /// Applies the edit to a network.
    pub fn apply(&self, network: &mut Network) {
        match self {
            Edit::Set {
                replica,
                field,
                value,
            } => {
                let model = match replica {
                    0 => network.server_model(),
                    n => network.model((n - 1) % network.peer_count().max(1)),
                };
                model.set(field.as_str(), Field::Scalar(value.clone()));
            }
            Edit::Settle => network.settle(),
        }
    }
}

/// Strategy for a single edit on one of `replicas` replicas.
pub fn edit_strategy(replicas: usize) -> impl Strategy<Value = Edit> {
    prop_oneof![
        4 => (0..replicas.max(1), field_name_strategy(), scalar_strategy()).prop_map(
            |(replica, field, value)| Edit::Set {
                replica,
                field,
                value,
            }
        ),
        1 => Just(Edit::Settle),
    ]
}

/// Strategy for edit scripts where every edit is immediately settled.
pub fn settled_script_strategy(
    replicas: usize,
    len: usize,
) -> impl Strategy<Value = Vec<Edit>> {
    prop::collection::vec(
        (0..replicas.max(1), field_name_strategy(), scalar_strategy()),
        1..=len.max(1),
    )
    .prop_map(|sets| {
        sets.into_iter()
            .flat_map(|(replica, field, value)| {
                [
                    Edit::Set {
                        replica,
                        field,
                        value,
                    },
                    Edit::Settle,
                ]
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn scalars_equal_themselves(scalar in scalar_strategy()) {
            prop_assert_eq!(scalar.clone(), scalar);
        }

        #[test]
        fn settled_scripts_alternate(script in settled_script_strategy(3, 5)) {
            prop_assert_eq!(script.len() % 2, 0);
            let settled = script.iter().skip(1).step_by(2).all(|edit| matches!(edit, Edit::Settle));
            prop_assert!(settled);
        }
    }
}
