use std::fmt;
use std::sync::Arc;

use log::trace;
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::mesh_block::MeshBlock;

/// The largest number of tasks a single task list may hold. Adding more is
/// a configuration error rather than a silent wrap.
pub const MAX_TASKS: usize = 128;

const WORDS: usize = (MAX_TASKS + 63) / 64;

/// Identifier of a task within its list. Ids are handed out by
/// [`TaskList::add`] in insertion order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TaskId(usize);

/// A fixed-width set of task ids.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TaskSet([u64; WORDS]);

impl TaskSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_ids(ids: &[TaskId]) -> Self {
        let mut set = Self::empty();
        for id in ids {
            set.insert(*id)
        }
        set
    }

    pub fn insert(&mut self, id: TaskId) {
        self.0[id.0 / 64] |= 1 << (id.0 % 64)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.0[id.0 / 64] & (1 << (id.0 % 64)) != 0
    }

    /// Return true if every id in `other` is also in `self`.
    pub fn contains_all(&self, other: &TaskSet) -> bool {
        self.0.iter().zip(other.0.iter()).all(|(a, b)| a & b == *b)
    }

    pub fn len(&self) -> usize {
        self.0.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|w| *w == 0)
    }
}

impl fmt::Debug for TaskSet {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<usize> = (0..MAX_TASKS).filter(|&i| self.contains(TaskId(i))).collect();
        write!(fmt, "TaskSet{:?}", ids)
    }
}

/// Returned by a task operation to say whether it did its work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    Done,
    Pending,
}

impl TaskOutcome {
    pub fn done_if(condition: bool) -> Self {
        if condition {
            Self::Done
        } else {
            Self::Pending
        }
    }
}

/// Returned by [`TaskList::advance_one_task`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Advance {
    /// Every task was already complete.
    Nothing,
    /// A task ran and others remain.
    Running,
    /// The last outstanding task ran.
    Complete,
    /// At least one task had its dependencies met, but none could proceed
    /// (each reported `Pending`).
    Waiting,
    /// No incomplete task has its dependencies met. Completions only come
    /// from the block's own tasks, so this block can never finish.
    Stuck,
}

/// The per-block progress through a task list, reset at the start of every
/// round.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TaskState {
    first: usize,
    remaining: usize,
    completed: TaskSet,
}

impl TaskState {
    pub fn completed(&self) -> &TaskSet {
        &self.completed
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }
}

/// An operation run by a task: it gets the block, the round context, and the
/// task's argument token.
pub type TaskFn<X> = Arc<dyn Fn(&mut MeshBlock, &X, usize) -> Result<TaskOutcome> + Send + Sync>;

struct Task<X> {
    name: String,
    id: TaskId,
    depends: TaskSet,
    arg: usize,
    op: TaskFn<X>,
}

/// An ordered list of named tasks with declared dependencies, shared by all
/// blocks on a worker. Each block keeps its own [`TaskState`]. A task is
/// eligible once every task it depends on has completed; it then runs until
/// it reports [`TaskOutcome::Done`], after which it is not run again in that
/// round.
pub struct TaskList<X> {
    tasks: Vec<Task<X>>,
}

impl<X> Default for TaskList<X> {
    fn default() -> Self {
        Self { tasks: Vec::new() }
    }
}

impl<X> TaskList<X> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task depending on the given (previously added) tasks.
    pub fn add<F>(&mut self, name: &str, depends: &[TaskId], arg: usize, op: F) -> Result<TaskId>
    where
        F: Fn(&mut MeshBlock, &X, usize) -> Result<TaskOutcome> + Send + Sync + 'static,
    {
        if self.tasks.len() == MAX_TASKS {
            return Err(Error::config(format!(
                "cannot add task '{}': a task list holds at most {} tasks",
                name, MAX_TASKS
            )));
        }
        let id = TaskId(self.tasks.len());

        self.tasks.push(Task {
            name: name.to_string(),
            id,
            depends: TaskSet::from_ids(depends),
            arg,
            op: Arc::new(op),
        });
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(|t| t.name.as_str())
    }

    /// Mark every task incomplete for a new round.
    pub fn reset(&self, state: &mut TaskState) {
        *state = TaskState {
            first: 0,
            remaining: self.tasks.len(),
            completed: TaskSet::empty(),
        }
    }

    /// Return the name of the first task not yet complete on a block.
    pub fn first_incomplete(&self, state: &TaskState) -> Option<&str> {
        self.tasks[state.first..]
            .iter()
            .find(|t| !state.completed.contains(t.id))
            .map(|t| t.name.as_str())
    }

    /// Scan the block's tasks from its first incomplete one, and run the
    /// first eligible task able to make progress. Tasks reporting `Pending`
    /// are passed over, so later independent tasks can still run.
    pub fn advance_one_task(&self, block: &mut MeshBlock, context: &X) -> Result<Advance> {
        if block.tasks.remaining == 0 {
            return Ok(Advance::Nothing);
        }
        let mut skip = true;
        let mut any_eligible = false;

        for n in block.tasks.first..self.tasks.len() {
            let task = &self.tasks[n];

            if block.tasks.completed.contains(task.id) {
                if skip {
                    block.tasks.first = n + 1;
                }
                continue;
            }
            skip = false;

            if !block.tasks.completed.contains_all(&task.depends) {
                continue;
            }
            any_eligible = true;

            if (task.op)(block, context, task.arg)? == TaskOutcome::Done {
                trace!("block {}: {} done", block.gid, task.name);
                block.tasks.completed.insert(task.id);
                block.tasks.remaining -= 1;

                if block.tasks.remaining == 0 {
                    block.tasks.first = self.tasks.len();
                    return Ok(Advance::Complete);
                }
                return Ok(Advance::Running);
            }
        }
        if any_eligible {
            Ok(Advance::Waiting)
        } else {
            Ok(Advance::Stuck)
        }
    }
}

/// Drive every block through a task list until all of them complete. Each
/// pass advances every block by one task, in parallel on the given pool.
/// A block finishing counts as progress. When a whole pass makes no
/// progress, `on_idle` is called (typically to
/// wait for incoming messages) before the next pass.
pub fn run_round<X, I>(
    list: &TaskList<X>,
    blocks: &mut [MeshBlock],
    context: &X,
    pool: &rayon::ThreadPool,
    mut on_idle: I,
) -> Result<()>
where
    X: Sync,
    I: FnMut() -> Result<()>,
{
    for block in blocks.iter_mut() {
        list.reset(&mut block.tasks)
    }

    loop {
        let results: Vec<Result<Advance>> = pool.install(|| {
            blocks
                .par_iter_mut()
                .map(|block| list.advance_one_task(block, context))
                .collect()
        });

        let mut progress = false;
        let mut finished = true;

        for (block, result) in blocks.iter().zip(results) {
            match result? {
                Advance::Nothing => {}
                Advance::Complete => progress = true,
                Advance::Running => {
                    progress = true;
                    finished = false;
                }
                Advance::Waiting => finished = false,
                Advance::Stuck => {
                    return Err(Error::Deadlock {
                        gid: block.gid,
                        task: list.first_incomplete(&block.tasks).unwrap_or("?").to_string(),
                    })
                }
            }
        }
        if finished {
            return Ok(());
        }
        if !progress {
            on_idle()?;
        }
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::config::RegionSize;
    use crate::logical_location::LogicalLocation;
    use crate::mesh_block::Coordinates;
    use crate::neighbor::{BoundaryFlag, NeighborTable};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn block(gid: usize) -> MeshBlock {
        let size = RegionSize {
            min: [0.0; 3],
            max: [1.0; 3],
            ratio: [1.0; 3],
            cells: [4, 1, 1],
        };
        let bcs = [BoundaryFlag::Outflow; 6];
        let loc = LogicalLocation::new([gid as i64, 0, 0], 0);
        let coords = Coordinates::new(&size, &size, &loc, 0, &bcs);
        MeshBlock::new(gid, gid, loc, size, bcs, NeighborTable::default(), coords, 1, false, 1.0)
    }

    fn pool() -> rayon::ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap()
    }

    #[test]
    fn task_set_works_past_one_word() {
        let mut set = TaskSet::empty();
        set.insert(TaskId(3));
        set.insert(TaskId(100));
        assert!(set.contains(TaskId(100)));
        assert!(!set.contains(TaskId(64)));
        assert_eq!(set.len(), 2);
        assert!(set.contains_all(&TaskSet::from_ids(&[TaskId(3)])));
        assert!(!set.contains_all(&TaskSet::from_ids(&[TaskId(4)])));
    }

    #[test]
    fn too_many_tasks_is_an_error() {
        let mut list = TaskList::<()>::new();
        for n in 0..MAX_TASKS {
            list.add(&format!("t{}", n), &[], 0, |_, _, _| Ok(TaskOutcome::Done)).unwrap();
        }
        assert!(matches!(list.add("one more", &[], 0, |_, _, _| Ok(TaskOutcome::Done)), Err(Error::Config(_))));
    }

    #[test]
    fn acyclic_graph_completes_in_dependency_order() {
        let mut list = TaskList::<()>::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let log = |name: &'static str, order: Arc<std::sync::Mutex<Vec<&'static str>>>| {
            move |_: &mut MeshBlock, _: &(), _: usize| {
                order.lock().unwrap().push(name);
                Ok(TaskOutcome::Done)
            }
        };
        let c = list.add("c", &[], 0, log("c", order.clone())).unwrap();
        let a = list.add("a", &[c], 0, log("a", order.clone())).unwrap();
        list.add("b", &[a, c], 0, log("b", order.clone())).unwrap();

        let mut b = block(0);
        list.reset(&mut b.tasks);
        assert_eq!(list.advance_one_task(&mut b, &()).unwrap(), Advance::Running);
        assert_eq!(list.advance_one_task(&mut b, &()).unwrap(), Advance::Running);
        assert_eq!(list.advance_one_task(&mut b, &()).unwrap(), Advance::Complete);
        assert_eq!(list.advance_one_task(&mut b, &()).unwrap(), Advance::Nothing);
        assert_eq!(*order.lock().unwrap(), vec!["c", "a", "b"]);
    }

    #[test]
    fn pending_tasks_are_passed_over() {
        let mut list = TaskList::<AtomicUsize>::new();
        let wait = list
            .add("wait", &[], 0, |_, polls: &AtomicUsize, _| {
                Ok(TaskOutcome::done_if(polls.fetch_add(1, Ordering::SeqCst) >= 2))
            })
            .unwrap();
        list.add("independent", &[], 0, |_, _, _| Ok(TaskOutcome::Done)).unwrap();
        list.add("after", &[wait], 0, |_, _, _| Ok(TaskOutcome::Done)).unwrap();

        let polls = AtomicUsize::new(0);
        let mut b = block(0);
        list.reset(&mut b.tasks);

        assert_eq!(list.advance_one_task(&mut b, &polls).unwrap(), Advance::Running);
        assert_eq!(list.first_incomplete(&b.tasks), Some("wait"));
        assert_eq!(list.advance_one_task(&mut b, &polls).unwrap(), Advance::Waiting);
        assert_eq!(list.advance_one_task(&mut b, &polls).unwrap(), Advance::Running);
        assert_eq!(list.advance_one_task(&mut b, &polls).unwrap(), Advance::Complete);
    }

    #[test]
    fn cyclic_graph_is_flagged_as_deadlock() {
        let mut list = TaskList::<()>::new();
        let first = list.add("first", &[], 0, |_, _, _| Ok(TaskOutcome::Done)).unwrap();

        // depends on itself
        list.add("loop", &[first, TaskId(1)], 0, |_, _, _| Ok(TaskOutcome::Done)).unwrap();

        let mut blocks = vec![block(0), block(1)];

        let result = run_round(&list, &mut blocks, &(), &pool(), || Ok(()));
        match result {
            Err(Error::Deadlock { task, .. }) => assert_eq!(task, "loop"),
            _ => panic!("expected a deadlock"),
        }
    }

    #[test]
    fn round_completes_on_every_block() {
        let mut list = TaskList::<AtomicUsize>::new();
        let a = list
            .add("count", &[], 0, |_, n: &AtomicUsize, _| {
                n.fetch_add(1, Ordering::SeqCst);
                Ok(TaskOutcome::Done)
            })
            .unwrap();
        list.add("mark", &[a], 7, |b, _, arg| {
            b.new_dt = arg as f64;
            Ok(TaskOutcome::Done)
        })
        .unwrap();

        let counter = AtomicUsize::new(0);
        let mut blocks: Vec<_> = (0..5).map(block).collect();
        run_round(&list, &mut blocks, &counter, &pool(), || Ok(())).unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert!(blocks.iter().all(|b| b.new_dt == 7.0 && b.tasks.remaining() == 0));
    }

    #[test]
    fn finishing_a_block_is_progress() {
        let mut list = TaskList::<AtomicUsize>::new();
        list.add("gate", &[], 0, |block, opened: &AtomicUsize, _| {
            Ok(TaskOutcome::done_if(block.gid == 0 || opened.load(Ordering::SeqCst) > 0))
        })
        .unwrap();

        let opened = AtomicUsize::new(0);
        let mut idle = 0;
        let mut blocks = vec![block(0), block(1)];

        run_round(&list, &mut blocks, &opened, &pool(), || {
            idle += 1;
            opened.store(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        assert_eq!(idle, 1);
    }
}
