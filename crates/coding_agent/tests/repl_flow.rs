use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use agent_provider::ConfirmationRequest;
use agent_provider_mock::{MockProvider, ScriptStep};
use agent_session::{
    CoordinatorConfig, ManualScheduler, TaskCoordinator, TaskScheduler, ThreadScheduler,
};
use coding_agent::console::Console;
use coding_agent::repl::{Flow, Repl, HELP_TEXT};

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&lock_unpoisoned(&self.0)).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        lock_unpoisoned(&self.0).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if predicate() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    predicate()
}

fn repl_with(steps: Vec<ScriptStep>, scheduler: Arc<dyn TaskScheduler>) -> (Repl, SharedBuffer) {
    let buffer = SharedBuffer::default();
    let console = Arc::new(Console::new(buffer.clone()));
    let coordinator = TaskCoordinator::new(
        Arc::new(MockProvider::new(steps)),
        scheduler,
        console.clone(),
        CoordinatorConfig::default(),
    );
    console.attach(&coordinator);
    coordinator.create_session();
    (Repl::new(coordinator, console), buffer)
}

#[test]
fn prompts_submitted_while_busy_are_queued_and_listed() {
    let scheduler = Arc::new(ManualScheduler::new());
    let (repl, buffer) = repl_with(
        vec![ScriptStep::content("answer", "done")],
        scheduler.clone(),
    );

    assert_eq!(repl.handle_line("first"), Flow::Continue);
    assert_eq!(repl.handle_line("second"), Flow::Continue);
    assert_eq!(repl.handle_line("/queue"), Flow::Continue);

    let output = buffer.contents();
    assert!(output.contains("[queued #1]\n"), "{output}");
    assert!(output.contains("1. second\n"), "{output}");

    assert_eq!(scheduler.run_all(), 2);
    repl.handle_line("/queue");
    let output = buffer.contents();
    assert_eq!(output.matches("done\n").count(), 2, "{output}");
    assert!(output.ends_with("Queue is empty.\n"), "{output}");
}

#[test]
fn approval_is_requested_and_granted_from_the_prompt() {
    let (repl, buffer) = repl_with(
        vec![
            ScriptStep::Confirm(ConfirmationRequest::tool(
                "confirm-1",
                "call-1",
                "write_file",
                "Write README.md",
            )),
            ScriptStep::content("answer", "written"),
        ],
        Arc::new(ThreadScheduler),
    );

    repl.handle_line("update the readme");
    assert!(wait_until(Duration::from_secs(5), || {
        buffer.contents().contains("[approval] confirm-1: Write README.md")
    }));

    repl.handle_line("/approve confirm-1 session");
    assert!(wait_until(Duration::from_secs(5), || {
        buffer.contents().contains("written\n")
    }));
    let output = buffer.contents();
    assert!(output.contains("Approved confirm-1.\n"), "{output}");

    repl.handle_line("/approve confirm-1");
    assert!(buffer
        .contents()
        .contains("Error: request 'confirm-1' is already resolved"));
}

#[test]
fn stop_reports_when_nothing_runs_and_quit_ends_the_loop() {
    let (repl, buffer) = repl_with(Vec::new(), Arc::new(ManualScheduler::new()));

    repl.handle_line("/stop");
    repl.handle_line("/help");
    repl.handle_line("/rewind");
    repl.handle_line("/deny");
    repl.handle_line("/new");

    let output = buffer.contents();
    assert!(output.contains("Nothing is running.\n"));
    assert!(output.contains(HELP_TEXT));
    assert!(output.contains("Unknown command: /rewind\n"));
    assert!(output.contains("Usage: /deny <request-id>\n"));
    assert!(output.contains("[session] "), "{output}");

    assert_eq!(repl.handle_line("/quit"), Flow::Quit);
}
