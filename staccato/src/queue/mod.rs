//! Lock-free work queues: the per-(priority, worker) subtask pipe and the
//! per-(priority, worker) pinned-task list.

pub(crate) mod pipe;
pub(crate) use pipe::Pipe;

pub(crate) mod pinned_list;
pub(crate) use pinned_list::PinnedTaskList;

use crate::task::SubTask;

pub(crate) type TaskPipe = Pipe<SubTask>;
