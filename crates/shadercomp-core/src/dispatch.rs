use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use shadercomp_combos::{ComboHandle, ComboSchedule, EntryInfo};
use shadercomp_vcs::pack_dynamic_combos;
use tracing::debug;

use crate::diagnostics::Diagnostics;
use crate::executor::{CompileExecutor, CompileResponse};
use crate::store::ResultStore;

/// Idle marker in a worker's running-command slot.
const IDLE: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchOptions {
    /// Worker threads; 0 resolves to the machine's parallelism. The
    /// effective count is always capped by available parallelism.
    pub threads: usize,
    /// Opaque compile-tool flags forwarded to the executor.
    pub flags: u32,
    /// Stop the range on the first failed command.
    pub fast_fail: bool,
}

/// Mutable scheduling state for one command range, behind the range lock.
#[derive(Debug)]
struct RangeState {
    next_command: u64,
    end_command: u64,
    /// Completion watermark: every command below it has been handled.
    last_finished: u64,
    /// The combo the next worker will take.
    cursor: Option<ComboHandle>,
    /// Command currently held by each worker, or [`IDLE`].
    running: Vec<u64>,
}

impl RangeState {
    fn begin(schedule: &ComboSchedule, first: u64, end: u64, workers: usize) -> RangeState {
        let mut state = RangeState {
            next_command: first,
            end_command: end,
            last_finished: first,
            cursor: None,
            running: vec![IDLE; workers],
        };
        schedule.next_combo(&mut state.next_command, &mut state.cursor, end);
        state
    }

    /// Account `command` as handled. Returns the span of commands newly
    /// proven complete, if the watermark advanced.
    ///
    /// A worker still holding an earlier command pins the watermark: until
    /// it reports in, nothing at or above `command` can be proven complete.
    fn advance_watermark(&mut self, command: u64) -> Option<(u64, u64)> {
        let mut finished_by_now = command + 1;
        if self.running.iter().any(|&running| running < command) {
            finished_by_now = 0;
        }
        if finished_by_now > self.last_finished {
            let previous = self.last_finished;
            self.last_finished = finished_by_now;
            Some((previous, finished_by_now))
        } else {
            None
        }
    }
}

/// Feeds a schedule's command ranges through the executor and drives ordered
/// packaging of each completed static combo.
pub struct Dispatcher<'a> {
    schedule: &'a ComboSchedule,
    executor: &'a dyn CompileExecutor,
    store: &'a ResultStore,
    diagnostics: &'a Diagnostics,
    options: DispatchOptions,
    stop: Arc<AtomicBool>,
    on_command_done: Option<Box<dyn Fn() + Send + Sync + 'a>>,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        schedule: &'a ComboSchedule,
        executor: &'a dyn CompileExecutor,
        store: &'a ResultStore,
        diagnostics: &'a Diagnostics,
        options: DispatchOptions,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Dispatcher {
            schedule,
            executor,
            store,
            diagnostics,
            options,
            stop,
            on_command_done: None,
        }
    }

    /// Invoke `f` after every handled command (progress reporting).
    pub fn set_command_done_hook(&mut self, f: impl Fn() + Send + Sync + 'a) {
        self.on_command_done = Some(Box::new(f));
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Compile every non-skipped command in `[first, end)` and package every
    /// static combo the range completes. Blocks until the range is done or
    /// stopped.
    pub fn process_range(&self, first: u64, end: u64) {
        if first >= end {
            return;
        }
        let workers = self.effective_workers();
        if workers <= 1 {
            self.process_range_single(first, end);
        } else {
            self.process_range_threaded(first, end, workers);
        }
    }

    fn effective_workers(&self) -> usize {
        let hardware = thread::available_parallelism().map_or(1, |n| n.get());
        match self.options.threads {
            0 => hardware,
            configured => configured.min(hardware),
        }
    }

    /// Single-threaded fast path: the range state is owned by this call, so
    /// no lock is ever taken.
    fn process_range_single(&self, first: u64, end: u64) {
        let mut state = RangeState::begin(self.schedule, first, end, 0);

        loop {
            let Some(handle) = state.cursor.as_ref() else {
                break;
            };
            if self.stopped() {
                break;
            }
            let command = handle.command_num();
            let response = self.execute(handle);
            self.record_response(handle, response);

            if !self.stopped() {
                if let Some((from, to)) = state.advance_watermark(command) {
                    self.package_span(from, to);
                }
            }

            let mut cursor = state.cursor.take();
            self.schedule
                .next_combo(&mut state.next_command, &mut cursor, state.end_command);
            state.cursor = cursor;
        }

        self.finish_range_state(&mut state);
    }

    fn process_range_threaded(&self, first: u64, end: u64, workers: usize) {
        let range = Mutex::new(RangeState::begin(self.schedule, first, end, workers));

        thread::scope(|scope| {
            for worker in 0..workers {
                let range = &range;
                scope.spawn(move || self.worker_loop(range, worker));
            }
        });

        let mut state = range.into_inner().expect("range lock poisoned");
        self.finish_range_state(&mut state);
    }

    fn worker_loop(&self, range: &Mutex<RangeState>, me: usize) {
        let mut handle: Option<ComboHandle> = None;

        loop {
            {
                let mut guard = self.range_lock(range);
                let state = &mut *guard;
                match &state.cursor {
                    Some(cursor) if !self.stopped() => {
                        handle = Some(cursor.clone());
                        state.running[me] = cursor.command_num();

                        let mut cursor = state.cursor.take();
                        self.schedule.next_combo(
                            &mut state.next_command,
                            &mut cursor,
                            state.end_command,
                        );
                        state.cursor = cursor;
                    }
                    _ => {
                        state.running[me] = IDLE;
                        break;
                    }
                }
            }

            let current = handle.as_ref().expect("assigned under the range lock");
            let command = current.command_num();
            let response = self.execute(current);
            self.record_response(current, response);
            self.try_package(range, command);
        }
    }

    /// Flush whatever the watermark proves complete once every command has
    /// been handled (or the range stopped).
    fn finish_range_state(&self, state: &mut RangeState) {
        if self.stopped() || state.end_command == 0 {
            return;
        }
        if let Some((from, to)) = state.advance_watermark(state.end_command - 1) {
            self.package_span(from, to);
        }
    }

    fn execute(&self, handle: &ComboHandle) -> CompileResponse {
        let command_line = handle.format_command();
        debug!(command = handle.command_num(), %command_line, "running compile command");
        self.executor.execute(&command_line, self.options.flags)
    }

    /// Deposit one response: bytecode into the store on success, failure
    /// marking and listing capture otherwise. Never touches the range lock.
    fn record_response(&self, handle: &ComboHandle, response: CompileResponse) {
        let entry = handle.entry();

        if response.succeeded {
            let bytecode = response.bytecode.unwrap_or_default();
            self.store
                .add_dynamic(&entry.name, handle.static_id(), handle.dynamic_id(), bytecode);
        } else {
            self.store.mark_failed(&entry.name);
        }

        if response.listing.is_some() || !response.succeeded {
            let listing = response.listing.unwrap_or_else(|| {
                format!(
                    "{}(0,0): error 0000: compiler failed without error description. Command number {}",
                    entry.source_file,
                    handle.command_num()
                )
            });
            self.diagnostics
                .report_listing(&entry.name, &handle.format_command_human(), &listing);
            if !response.succeeded && self.options.fast_fail {
                self.stop();
            }
        }

        if let Some(hook) = &self.on_command_done {
            hook();
        }
    }

    fn try_package(&self, range: &Mutex<RangeState>, command: u64) {
        if self.stopped() {
            return;
        }
        let span = {
            let mut state = self.range_lock(range);
            state.advance_watermark(command)
        };
        if let Some((from, to)) = span {
            self.package_span(from, to);
        }
    }

    /// Package every static combo whose last command lies in `[from, to)`.
    /// The watermark proves no further dynamic combos for them can arrive.
    fn package_span(&self, from: u64, to: u64) {
        for entry in self.schedule.entries() {
            if entry.command_end <= from || entry.command_start >= to {
                continue;
            }
            let dyn_size = entry.num_dynamic_combos;
            let rel_from = from.saturating_sub(entry.command_start);
            let rel_to = (to - entry.command_start).min(entry.num_combos);

            let first_static = rel_from / dyn_size;
            let end_static = rel_to / dyn_size;
            for static_id in first_static..end_static {
                self.package_static(entry, static_id);
            }
        }
    }

    fn package_static(&self, entry: &EntryInfo, static_id: u64) {
        let Some(blocks) = self.store.take_blocks(&entry.name, static_id) else {
            return;
        };
        if blocks.is_empty() {
            return;
        }

        let packed = pack_dynamic_combos(
            blocks
                .iter()
                .map(|block| (block.dynamic_id, block.bytes.as_slice())),
        )
        .unwrap_or_else(|err| {
            // Packing only fails on id/length narrowing, which the schedule
            // rules out; anything else is an invariant breach.
            panic!("packing static combo {static_id} of `{}`: {err}", entry.name)
        });
        self.store.store_packed(&entry.name, static_id, packed);
    }

    fn range_lock<'m>(&self, range: &'m Mutex<RangeState>) -> std::sync::MutexGuard<'m, RangeState> {
        range.lock().expect("range lock poisoned")
    }
}
