//! Tracking of outstanding command subsets.
//!
//! Subsets are consumed strictly in order: the next subset only becomes
//! visible once every command of the current one has been folded.

use std::collections::VecDeque;

use callcache_core::{CommandSet, DestinationPlan, IoCommand};

/// What the worker should do after folding one completed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// Commands of the current subset are still outstanding.
    StillWaiting,
    /// The current subset finished; dispatch this one next.
    NextSubset(CommandSet),
    /// Every subset finished.
    AllDone,
}

/// Outstanding subsets plus the data carried through to the success response.
#[derive(Debug)]
pub struct PendingWork {
    subsets: VecDeque<CommandSet>,
    plan: DestinationPlan,
    return_code: Option<i32>,
}

impl PendingWork {
    /// Track `subsets` in order. Empty subsets are dropped.
    pub fn new<I>(subsets: I, plan: DestinationPlan, return_code: Option<i32>) -> Self
    where
        I: IntoIterator<Item = CommandSet>,
    {
        Self {
            subsets: subsets
                .into_iter()
                .filter(|subset| !subset.is_empty())
                .collect(),
            plan,
            return_code,
        }
    }

    /// Subset currently being executed.
    #[must_use]
    pub fn current(&self) -> Option<&CommandSet> {
        self.subsets.front()
    }

    /// Whether `command` belongs to the current subset.
    #[must_use]
    pub fn is_current(&self, command: &IoCommand) -> bool {
        self.current().is_some_and(|subset| subset.contains(command))
    }

    /// Remove a completed command from the current subset.
    pub fn fold(&mut self, command: &IoCommand) -> Progress {
        let Some(current) = self.subsets.front_mut() else {
            return Progress::AllDone;
        };
        current.remove(command);
        if !current.is_empty() {
            return Progress::StillWaiting;
        }

        self.subsets.pop_front();
        self.subsets
            .front()
            .map_or(Progress::AllDone, |next| Progress::NextSubset(next.clone()))
    }

    /// Release the plan and return code for the success response.
    #[must_use]
    pub fn into_parts(self) -> (DestinationPlan, Option<i32>) {
        (self.plan, self.return_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callcache_core::{CopyResult, StoragePath};

    fn touch(raw: &str) -> CopyResult<IoCommand> {
        Ok(IoCommand::touch(StoragePath::parse(raw)?))
    }

    #[test]
    fn subsets_advance_only_when_fully_folded() -> CopyResult<()> {
        let (a, b, c) = (touch("/a")?, touch("/b")?, touch("/c")?);
        let mut work = PendingWork::new(
            [
                CommandSet::from([a.clone(), b.clone()]),
                CommandSet::new(),
                CommandSet::from([c.clone()]),
            ],
            DestinationPlan::default(),
            Some(0),
        );

        assert!(work.is_current(&a));
        assert!(!work.is_current(&c));
        assert_eq!(work.fold(&b), Progress::StillWaiting);
        assert_eq!(work.fold(&a), Progress::NextSubset(CommandSet::from([c.clone()])));
        assert!(work.is_current(&c));
        assert_eq!(work.fold(&c), Progress::AllDone);
        assert!(work.current().is_none());

        let (_, return_code) = work.into_parts();
        assert_eq!(return_code, Some(0));
        Ok(())
    }

    #[test]
    fn unknown_commands_do_not_advance() -> CopyResult<()> {
        let (a, stranger) = (touch("/a")?, touch("/stranger")?);
        let mut work = PendingWork::new([CommandSet::from([a.clone()])], DestinationPlan::default(), None);
        assert_eq!(work.fold(&stranger), Progress::StillWaiting);
        assert!(work.is_current(&a));
        Ok(())
    }

    #[test]
    fn empty_input_is_done_immediately() {
        let work = PendingWork::new([CommandSet::new()], DestinationPlan::default(), None);
        assert!(work.current().is_none());
        let (plan, _) = work.into_parts();
        assert!(plan.commands.is_empty());
    }
}
