//! Change event application.

use crate::error::Result;
use crate::subscriptions::ChangeEvent;
use crate::types::Record;

/// What an Insert does when a row with the same id is already present.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum InsertPolicy {
    /// Always prepend. A repeated Insert yields duplicate entries.
    #[default]
    Prepend,

    /// Overwrite existing rows with the same id in place; prepend otherwise.
    Upsert,
}

/// Outcome of applying one event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    /// Row became the new head.
    Inserted,
    /// `count` rows with a matching id were replaced in place.
    Replaced { count: usize },
    /// `count` rows with a matching id were removed.
    Removed { count: usize },
    /// No row matched; the collection is unchanged.
    Ignored,
}

impl Applied {
    pub fn changed(&self) -> bool {
        !matches!(self, Applied::Ignored)
    }
}

/// Apply a change event to an ordered collection.
///
/// Update and Delete match every row sharing the event's id, so duplicates
/// left behind by repeated Inserts are updated or removed together.
/// An event whose row has no usable `id` is rejected and leaves the
/// collection untouched.
pub fn apply_event(
    records: &mut Vec<Record>,
    event: ChangeEvent,
    policy: InsertPolicy,
) -> Result<Applied> {
    match event {
        ChangeEvent::Insert { new } => {
            let id = new.require_id()?;

            if policy == InsertPolicy::Upsert {
                let count = replace_matching(records, &new, |r| r.id().as_ref() == Some(&id));
                if count > 0 {
                    return Ok(Applied::Replaced { count });
                }
            }

            records.insert(0, new);
            Ok(Applied::Inserted)
        }

        ChangeEvent::Update { new } => {
            let id = new.require_id()?;
            let count = replace_matching(records, &new, |r| r.id().as_ref() == Some(&id));

            if count == 0 {
                Ok(Applied::Ignored)
            } else {
                Ok(Applied::Replaced { count })
            }
        }

        ChangeEvent::Delete { old } => {
            let id = old.require_id()?;
            let before = records.len();
            records.retain(|r| r.id().as_ref() != Some(&id));

            match before - records.len() {
                0 => Ok(Applied::Ignored),
                count => Ok(Applied::Removed { count }),
            }
        }
    }
}

fn replace_matching<F>(records: &mut [Record], new: &Record, matches: F) -> usize
where
    F: Fn(&Record) -> bool,
{
    let mut count = 0;
    for slot in records.iter_mut().filter(|r| matches(r)) {
        *slot = new.clone();
        count += 1;
    }
    count
}
