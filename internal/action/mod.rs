use futures_util::future::BoxFuture;
use std::collections::VecDeque;
use std::future::Future;

pub mod put_part;

// Outcome of one task: advance to the next task, or jump straight to the
// terminal responder. A task reports its outcome exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Next,
    Respond,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Pending,
    Running,
    AwaitingAsync,
    Done,
}

pub type TaskFuture<'a> = BoxFuture<'a, Step>;
pub type TaskFn<A> = Box<dyn for<'a> FnMut(&'a mut A) -> TaskFuture<'a> + Send>;

struct NamedTask<A> {
    name: &'static str,
    run: TaskFn<A>,
}

// An ordered queue of named continuations over an action value. The queue is
// fixed before `run`; the runner dispatches tasks in submission order and the
// terminal handler consumes the action, so exactly one response is produced
// per started pipeline.
pub struct ActionPipeline<A> {
    tasks: VecDeque<NamedTask<A>>,
    state: PipelineState,
}

impl<A> Default for ActionPipeline<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> ActionPipeline<A> {
    pub fn new() -> Self {
        Self {
            tasks: VecDeque::new(),
            state: PipelineState::Pending,
        }
    }

    // Legal only before `run`.
    pub fn add_task<F>(&mut self, name: &'static str, task: F)
    where
        F: for<'a> FnMut(&'a mut A) -> TaskFuture<'a> + Send + 'static,
    {
        debug_assert_eq!(self.state, PipelineState::Pending);
        self.tasks.push_back(NamedTask {
            name,
            run: Box::new(task),
        });
    }

    // Legal only before `run`.
    pub fn clear_tasks(&mut self) {
        debug_assert_eq!(self.state, PipelineState::Pending);
        self.tasks.clear();
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn task_names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|task| task.name).collect()
    }

    pub async fn run<R, T, Fut>(mut self, mut action: A, terminal: T) -> R
    where
        T: FnOnce(A) -> Fut,
        Fut: Future<Output = R>,
    {
        self.state = PipelineState::Running;
        while let Some(mut task) = self.tasks.pop_front() {
            self.state = PipelineState::AwaitingAsync;
            let step = (task.run)(&mut action).await;
            self.state = PipelineState::Running;
            match step {
                Step::Next => continue,
                Step::Respond => {
                    tracing::debug!(task = task.name, "task short-circuited to the response");
                    break;
                }
            }
        }
        self.state = PipelineState::Done;
        terminal(action).await
    }
}
