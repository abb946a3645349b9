//! Generic idempotent-upsert protocol for projections (decision half).
//!
//! Every read-model synchronizer runs the same protocol for an inbound event of
//! entity `X`:
//!
//! 1. look up the stored position for `X` (absent if never seen)
//! 2. **duplicate**: stored `last_event_id == event_id` → no-op
//! 3. **stale**: stored `version >= version` → no-op
//! 4. dispatch on the event kind (create / replace / tombstone / ignore)
//!
//! Steps 2–3 make redelivery and bounded reordering harmless: a repeated or older
//! event can never change the stored state. This module holds the pure decision;
//! applying it to storage lives in `mrp-infra`.

use mrp_core::EventId;

use crate::EventKind;

/// What a projection row remembers about the event stream that built it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StreamPosition {
    pub version: i64,
    pub last_event_id: EventId,
}

/// Why an inbound event was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The exact event was already applied.
    Duplicate,
    /// The event is not newer than what is stored.
    Stale { stored: i64, incoming: i64 },
    /// An update/delete arrived for an id that was never created here.
    MissingPredecessor(EventKind),
    /// The event type is not one this projection understands.
    UnknownEventType,
}

/// What the synchronizer should do with an inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// No row yet: build a fresh one from the payload.
    Insert,
    /// Replace every business field from the payload.
    ///
    /// `recreate` is set for a newer `Created` on an existing row, which also clears
    /// the soft-delete flag.
    Replace { recreate: bool },
    /// Flip the soft-delete flag, keep the business fields as they stood.
    MarkDeleted,
    /// Discard; stored state stays untouched.
    Skip(SkipReason),
}

/// Result of applying one inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Inserted,
    Replaced,
    Deleted,
    Skipped(SkipReason),
}

impl SyncOutcome {
    /// Whether the stored state changed.
    pub fn is_applied(&self) -> bool {
        !matches!(self, SyncOutcome::Skipped(_))
    }

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            SyncOutcome::Inserted => "inserted",
            SyncOutcome::Replaced => "replaced",
            SyncOutcome::Deleted => "deleted",
            SyncOutcome::Skipped(SkipReason::Duplicate) => "duplicate",
            SyncOutcome::Skipped(SkipReason::Stale { .. }) => "stale",
            SyncOutcome::Skipped(SkipReason::MissingPredecessor(_)) => "missing_predecessor",
            SyncOutcome::Skipped(SkipReason::UnknownEventType) => "unknown_event_type",
        }
    }
}

/// Decide how an inbound event affects the stored projection.
///
/// `kind` is `None` when the event type could not be parsed for this entity.
pub fn decide(
    current: Option<StreamPosition>,
    event_id: EventId,
    version: i64,
    kind: Option<EventKind>,
) -> Decision {
    if let Some(pos) = current {
        if pos.last_event_id == event_id {
            return Decision::Skip(SkipReason::Duplicate);
        }
        if version <= pos.version {
            return Decision::Skip(SkipReason::Stale {
                stored: pos.version,
                incoming: version,
            });
        }
    }

    match (kind, current) {
        (None, _) => Decision::Skip(SkipReason::UnknownEventType),
        (Some(EventKind::Created), None) => Decision::Insert,
        (Some(EventKind::Created), Some(_)) => Decision::Replace { recreate: true },
        (Some(EventKind::Updated), Some(_)) => Decision::Replace { recreate: false },
        (Some(EventKind::Deleted), Some(_)) => Decision::MarkDeleted,
        (Some(kind), None) => Decision::Skip(SkipReason::MissingPredecessor(kind)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(version: i64, last_event_id: EventId) -> Option<StreamPosition> {
        Some(StreamPosition {
            version,
            last_event_id,
        })
    }

    #[test]
    fn created_on_empty_inserts() {
        let d = decide(None, EventId::new(), 1, Some(EventKind::Created));
        assert_eq!(d, Decision::Insert);
    }

    #[test]
    fn same_event_id_is_duplicate_even_with_higher_version() {
        let e1 = EventId::new();
        let d = decide(pos(1, e1), e1, 5, Some(EventKind::Updated));
        assert_eq!(d, Decision::Skip(SkipReason::Duplicate));
    }

    #[test]
    fn older_or_equal_versions_are_stale() {
        let stored = pos(3, EventId::new());
        for v in [0, 2, 3] {
            assert_eq!(
                decide(stored, EventId::new(), v, Some(EventKind::Updated)),
                Decision::Skip(SkipReason::Stale {
                    stored: 3,
                    incoming: v
                })
            );
        }
    }

    #[test]
    fn update_and_delete_need_a_predecessor() {
        assert_eq!(
            decide(None, EventId::new(), 2, Some(EventKind::Updated)),
            Decision::Skip(SkipReason::MissingPredecessor(EventKind::Updated))
        );
        assert_eq!(
            decide(None, EventId::new(), 2, Some(EventKind::Deleted)),
            Decision::Skip(SkipReason::MissingPredecessor(EventKind::Deleted))
        );
    }

    #[test]
    fn newer_events_dispatch_on_kind() {
        let stored = pos(1, EventId::new());
        assert_eq!(
            decide(stored, EventId::new(), 2, Some(EventKind::Updated)),
            Decision::Replace { recreate: false }
        );
        assert_eq!(
            decide(stored, EventId::new(), 2, Some(EventKind::Deleted)),
            Decision::MarkDeleted
        );
        assert_eq!(
            decide(stored, EventId::new(), 2, Some(EventKind::Created)),
            Decision::Replace { recreate: true }
        );
    }

    #[test]
    fn unknown_types_are_ignored_without_error() {
        assert_eq!(
            decide(None, EventId::new(), 1, None),
            Decision::Skip(SkipReason::UnknownEventType)
        );
        assert_eq!(
            decide(pos(1, EventId::new()), EventId::new(), 2, None),
            Decision::Skip(SkipReason::UnknownEventType)
        );
    }

    #[cfg(test)]
    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        /// Minimal stored row: position + the "field" written by the last applied event.
        #[derive(Debug, Clone, PartialEq)]
        struct Row {
            pos: StreamPosition,
            value: i64,
            deleted: bool,
        }

        fn apply(row: Option<Row>, event: &(EventId, i64, EventKind)) -> Option<Row> {
            let (event_id, version, kind) = *event;
            let current = row.as_ref().map(|r| r.pos);
            let pos = StreamPosition {
                version,
                last_event_id: event_id,
            };
            match decide(current, event_id, version, Some(kind)) {
                Decision::Insert => Some(Row {
                    pos,
                    value: version,
                    deleted: false,
                }),
                Decision::Replace { recreate } => row.map(|r| Row {
                    pos,
                    value: version,
                    deleted: if recreate { false } else { r.deleted },
                }),
                Decision::MarkDeleted => row.map(|r| Row {
                    pos,
                    deleted: true,
                    ..r
                }),
                Decision::Skip(_) => row,
            }
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 500,
                ..ProptestConfig::default()
            })]

            /// Property: after a Created, any delivery order of newer updates converges
            /// on the highest version.
            #[test]
            fn converges_on_highest_version(
                n in 2i64..12,
                order in proptest::collection::vec(any::<prop::sample::Index>(), 1..40)
            ) {
                let updates: Vec<_> = (2..=n)
                    .map(|v| (EventId::new(), v, EventKind::Updated))
                    .collect();

                let mut row = apply(None, &(EventId::new(), 1, EventKind::Created));
                // Arbitrary order with repeats, then make sure each update shows up at least once.
                for idx in &order {
                    row = apply(row, &updates[idx.index(updates.len())]);
                }
                for ev in &updates {
                    row = apply(row, ev);
                }

                let row = row.unwrap();
                prop_assert_eq!(row.pos.version, n);
                prop_assert_eq!(row.value, n);
                prop_assert!(!row.deleted);
            }

            /// Property: applying the same event twice equals applying it once.
            #[test]
            fn reapplying_is_a_no_op(
                versions in proptest::collection::vec(1i64..50, 1..20)
            ) {
                let events: Vec<_> = versions
                    .iter()
                    .enumerate()
                    .map(|(i, v)| {
                        let kind = if i == 0 { EventKind::Created } else { EventKind::Updated };
                        (EventId::new(), *v, kind)
                    })
                    .collect();

                let mut row = None;
                for ev in &events {
                    let once = apply(row.clone(), ev);
                    let twice = apply(once.clone(), ev);
                    prop_assert_eq!(&once, &twice);
                    row = once;
                }
            }
        }
    }
}
