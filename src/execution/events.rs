//! Build lifecycle events and listener fan-out.
//!
//! Every frame owns an [`EventBus`]. Events are delivered synchronously to
//! a snapshot of the registered listeners, so a listener added or removed
//! while an event is being dispatched only sees later events.
//!
//! The bus also tracks which task each thread is running. Text written by
//! a thread through [`EventBus::thread_output`] goes to that task's output
//! handler, or becomes an ordinary logged message when there is none.
//!
//! # Event Types
//!
//! - `build-started` / `build-finished`
//! - `target-started` / `target-finished`
//! - `task-started` / `task-finished`
//! - `message`: a message logged by the engine or a component
//!
//! Events serialize to one JSON object per line with `--message-format json`.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread::{self, ThreadId};

use serde::{Deserialize, Serialize};

use crate::component::OutputHandler;
use crate::core::location::Location;
use crate::execution::error::ExecutionError;

/// Importance of a logged message. Lower is more important.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    Error,
    Warning,
    Info,
    Verbose,
    Debug,
}

impl fmt::Display for MessageLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageLevel::Error => "error",
            MessageLevel::Warning => "warning",
            MessageLevel::Info => "info",
            MessageLevel::Verbose => "verbose",
            MessageLevel::Debug => "debug",
        };
        f.write_str(name)
    }
}

impl FromStr for MessageLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "error" => Ok(MessageLevel::Error),
            "warning" | "warn" => Ok(MessageLevel::Warning),
            "info" => Ok(MessageLevel::Info),
            "verbose" => Ok(MessageLevel::Verbose),
            "debug" => Ok(MessageLevel::Debug),
            other => Err(format!(
                "`{}` is not a message level (error, warning, info, verbose, debug)",
                other
            )),
        }
    }
}

/// The model element an event concerns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ElementRef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

impl ElementRef {
    pub fn new(name: impl Into<String>, project: Option<&str>, location: &Location) -> Self {
        ElementRef {
            name: name.into(),
            project: project.map(str::to_string),
            location: Some(location.clone()).filter(Location::is_known),
        }
    }
}

/// A failure as seen by listeners.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Failure {
    pub message: String,
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

impl From<&ExecutionError> for Failure {
    fn from(error: &ExecutionError) -> Self {
        Failure {
            message: error.to_string(),
            category: error.category().to_string(),
            location: error.location().cloned(),
        }
    }
}

/// A build lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason")]
pub enum BuildEvent {
    #[serde(rename = "build-started")]
    BuildStarted { project: ElementRef },

    #[serde(rename = "build-finished")]
    BuildFinished {
        project: ElementRef,
        #[serde(skip_serializing_if = "Option::is_none")]
        failure: Option<Failure>,
    },

    #[serde(rename = "target-started")]
    TargetStarted { target: ElementRef },

    #[serde(rename = "target-finished")]
    TargetFinished {
        target: ElementRef,
        #[serde(skip_serializing_if = "Option::is_none")]
        failure: Option<Failure>,
    },

    #[serde(rename = "task-started")]
    TaskStarted { task: ElementRef },

    #[serde(rename = "task-finished")]
    TaskFinished {
        task: ElementRef,
        #[serde(skip_serializing_if = "Option::is_none")]
        failure: Option<Failure>,
    },

    #[serde(rename = "message")]
    MessageLogged {
        level: MessageLevel,
        message: String,
        /// Task or component that logged the message
        #[serde(skip_serializing_if = "Option::is_none")]
        source: Option<String>,
    },
}

impl BuildEvent {
    /// Failure carried by a finished event.
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            BuildEvent::BuildFinished { failure, .. }
            | BuildEvent::TargetFinished { failure, .. }
            | BuildEvent::TaskFinished { failure, .. } => failure.as_ref(),
            _ => None,
        }
    }

    /// Serialize this event to a JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Receives build events.
pub trait BuildListener: Send + Sync {
    fn on_event(&self, event: &BuildEvent);
}

/// Identity of one task execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub(crate) u64);

/// The task a thread works for.
#[derive(Clone)]
pub struct TaskEntry {
    pub id: TaskId,
    pub name: String,
    pub handler: Option<Arc<dyn OutputHandler>>,
}

impl fmt::Debug for TaskEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskEntry")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

/// Listener fan-out and thread-to-task attribution for one frame.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<Arc<dyn BuildListener>>>,
    threads: Mutex<HashMap<ThreadId, Vec<TaskEntry>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn BuildListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn BuildListener>) {
        let target = Arc::as_ptr(listener) as *const ();
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .retain(|l| Arc::as_ptr(l) as *const () != target);
    }

    /// Copy of the current listener list.
    pub fn listeners(&self) -> Vec<Arc<dyn BuildListener>> {
        self.listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn fire(&self, event: BuildEvent) {
        for listener in self.listeners() {
            listener.on_event(&event);
        }
    }

    pub fn build_started(&self, project: ElementRef) {
        self.fire(BuildEvent::BuildStarted { project });
    }

    pub fn build_finished(&self, project: ElementRef, failure: Option<&ExecutionError>) {
        self.fire(BuildEvent::BuildFinished {
            project,
            failure: failure.map(Failure::from),
        });
    }

    pub fn target_started(&self, target: ElementRef) {
        self.fire(BuildEvent::TargetStarted { target });
    }

    pub fn target_finished(&self, target: ElementRef, failure: Option<&ExecutionError>) {
        self.fire(BuildEvent::TargetFinished {
            target,
            failure: failure.map(Failure::from),
        });
    }

    /// Announce a task and attribute the calling thread to it.
    pub fn task_started(&self, task: ElementRef, entry: TaskEntry) {
        self.threads()
            .entry(thread::current().id())
            .or_default()
            .push(entry);
        self.fire(BuildEvent::TaskStarted { task });
    }

    /// Announce the end of a task and release the calling thread.
    pub fn task_finished(&self, task: ElementRef, id: TaskId, failure: Option<&ExecutionError>) {
        self.detach(thread::current().id(), id);
        self.fire(BuildEvent::TaskFinished {
            task,
            failure: failure.map(Failure::from),
        });
    }

    pub fn message_logged(&self, source: Option<&str>, message: impl Into<String>, level: MessageLevel) {
        self.fire(BuildEvent::MessageLogged {
            level,
            message: message.into(),
            source: source.map(str::to_string),
        });
    }

    /// The task the calling thread currently works for.
    pub fn current_task(&self) -> Option<TaskEntry> {
        self.threads()
            .get(&thread::current().id())
            .and_then(|stack| stack.last().cloned())
    }

    /// Attribute the calling thread to `entry` until the guard drops.
    pub fn attach(&self, entry: TaskEntry) -> AttachedThread<'_> {
        let id = entry.id;
        let thread = thread::current().id();
        self.threads().entry(thread).or_default().push(entry);
        AttachedThread {
            bus: self,
            thread,
            id,
        }
    }

    /// Route a line written by the calling thread.
    ///
    /// The line goes to the output handler of the task the thread works
    /// for. Without a task or handler, or when the handler fails, it is
    /// logged at info level (error level for error output).
    pub fn thread_output(&self, line: &str, is_error: bool) {
        let entry = self.current_task();
        if let Some(handler) = entry.as_ref().and_then(|e| e.handler.as_ref()) {
            match handler.output(line, is_error) {
                Ok(()) => return,
                Err(e) => tracing::debug!("output handler failed: {}", e),
            }
        }
        let level = if is_error {
            MessageLevel::Error
        } else {
            MessageLevel::Info
        };
        self.message_logged(entry.as_ref().map(|e| e.name.as_str()), line, level);
    }

    fn detach(&self, thread: ThreadId, id: TaskId) {
        let mut threads = self.threads();
        if let Some(stack) = threads.get_mut(&thread) {
            if let Some(pos) = stack.iter().rposition(|entry| entry.id == id) {
                stack.remove(pos);
            }
            if stack.is_empty() {
                threads.remove(&thread);
            }
        }
    }

    fn threads(&self) -> MutexGuard<'_, HashMap<ThreadId, Vec<TaskEntry>>> {
        self.threads
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Keeps a thread attributed to a task; see [`EventBus::attach`].
pub struct AttachedThread<'a> {
    bus: &'a EventBus,
    thread: ThreadId,
    id: TaskId,
}

impl Drop for AttachedThread<'_> {
    fn drop(&mut self) {
        self.bus.detach(self.thread, self.id);
    }
}

/// Records every event; useful for tests and tooling.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<BuildEvent>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<BuildEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Messages logged so far, in order.
    pub fn messages(&self) -> Vec<(MessageLevel, String)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                BuildEvent::MessageLogged { level, message, .. } => Some((level, message)),
                _ => None,
            })
            .collect()
    }
}

impl BuildListener for RecordingListener {
    fn on_event(&self, event: &BuildEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::error::TaskError;

    struct Collect(Mutex<Vec<(String, bool)>>);

    impl OutputHandler for Collect {
        fn output(&self, line: &str, is_error: bool) -> Result<(), TaskError> {
            self.0.lock().unwrap().push((line.to_string(), is_error));
            Ok(())
        }
    }

    struct Broken;

    impl OutputHandler for Broken {
        fn output(&self, _line: &str, _is_error: bool) -> Result<(), TaskError> {
            Err(TaskError::new("closed"))
        }
    }

    fn entry(id: u64, handler: Option<Arc<dyn OutputHandler>>) -> TaskEntry {
        TaskEntry {
            id: TaskId(id),
            name: format!("task{id}"),
            handler,
        }
    }

    #[test]
    fn test_message_level_order_and_parse() {
        assert!(MessageLevel::Error < MessageLevel::Warning);
        assert!(MessageLevel::Verbose < MessageLevel::Debug);
        assert_eq!("WARN".parse::<MessageLevel>(), Ok(MessageLevel::Warning));
        assert!("loud".parse::<MessageLevel>().is_err());
    }

    #[test]
    fn test_listener_snapshot_during_dispatch() {
        struct AddsAnother {
            bus: Arc<EventBus>,
            added: Arc<RecordingListener>,
        }

        impl BuildListener for AddsAnother {
            fn on_event(&self, _event: &BuildEvent) {
                self.bus.add_listener(self.added.clone());
            }
        }

        let bus = Arc::new(EventBus::new());
        let added = Arc::new(RecordingListener::new());
        bus.add_listener(Arc::new(AddsAnother {
            bus: Arc::clone(&bus),
            added: Arc::clone(&added),
        }));

        bus.message_logged(None, "first", MessageLevel::Info);
        assert!(added.events().is_empty());
        bus.message_logged(None, "second", MessageLevel::Info);
        assert_eq!(added.messages(), vec![(MessageLevel::Info, "second".to_string())]);
    }

    #[test]
    fn test_remove_listener() {
        let bus = EventBus::new();
        let recorder = Arc::new(RecordingListener::new());
        let listener: Arc<dyn BuildListener> = recorder.clone();
        bus.add_listener(Arc::clone(&listener));
        bus.remove_listener(&listener);
        bus.message_logged(None, "nobody hears this", MessageLevel::Info);
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn test_thread_output_goes_to_task_handler() {
        let bus = EventBus::new();
        let recorder = Arc::new(RecordingListener::new());
        bus.add_listener(recorder.clone());
        let collected = Arc::new(Collect(Mutex::new(Vec::new())));

        let element = ElementRef::new("echo", None, &Location::unknown());
        bus.task_started(element.clone(), entry(1, Some(collected.clone())));
        bus.thread_output("hello", false);
        bus.task_finished(element, TaskId(1), None);
        bus.thread_output("after", true);

        assert_eq!(
            *collected.0.lock().unwrap(),
            vec![("hello".to_string(), false)]
        );
        assert_eq!(recorder.messages(), vec![(MessageLevel::Error, "after".to_string())]);
    }

    #[test]
    fn test_failing_handler_falls_back_to_message() {
        let bus = EventBus::new();
        let recorder = Arc::new(RecordingListener::new());
        bus.add_listener(recorder.clone());

        let _guard = bus.attach(entry(7, Some(Arc::new(Broken))));
        bus.thread_output("lost?", false);

        match recorder.events().last() {
            Some(BuildEvent::MessageLogged { source, message, .. }) => {
                assert_eq!(source.as_deref(), Some("task7"));
                assert_eq!(message, "lost?");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_spawned_thread_attribution() {
        let bus = EventBus::new();
        let collected = Arc::new(Collect(Mutex::new(Vec::new())));
        let task = entry(3, Some(collected.clone()));

        std::thread::scope(|scope| {
            scope.spawn(|| {
                let _attached = bus.attach(task.clone());
                bus.thread_output("from worker", false);
            });
        });

        assert_eq!(collected.0.lock().unwrap().len(), 1);
        assert!(bus.current_task().is_none());
    }

    #[test]
    fn test_nested_tasks_restore_outer_attribution() {
        let bus = EventBus::new();
        let element = ElementRef::new("outer", None, &Location::unknown());
        bus.task_started(element.clone(), entry(1, None));
        bus.task_started(element.clone(), entry(2, None));
        bus.task_finished(element.clone(), TaskId(2), None);
        assert_eq!(bus.current_task().map(|e| e.id), Some(TaskId(1)));
        bus.task_finished(element, TaskId(1), None);
        assert!(bus.current_task().is_none());
    }

    #[test]
    fn test_event_json() {
        let event = BuildEvent::TaskFinished {
            task: ElementRef::new("echo", Some("demo"), &Location::unknown()),
            failure: None,
        };
        let json = event.to_json();
        assert!(json.contains(r#""reason":"task-finished""#));
        assert!(json.contains(r#""project":"demo""#));
        assert!(!json.contains("failure"));
    }
}
