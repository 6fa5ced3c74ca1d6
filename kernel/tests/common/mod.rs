//! Mock host kernel shared by the integration tests
//!
//! One process with a fixed thread list. Handler jumps are recorded instead
//! of executed, and `terminate` panics so tests can observe fatal delivery.

#![allow(dead_code)]

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Once};

use posix_signal::arch_impl::{HandlerCall, SignalArch};
use posix_signal::logger::{self, ConsoleSink};
use posix_signal::process::{ProcessId, ProcessRegistry, ThreadId, ThreadState};
use posix_signal::signal::{
    deliver_all, process_desc_alloc, thread_desc_alloc, ProcessSignals, SigInfo, SigSet,
    SignalAction, ThreadSignals,
};
use posix_signal::SignalConfig;

pub const PID: ProcessId = ProcessId::new(1);
pub const FIRST_TID: u64 = 100;
pub const HANDLER: u64 = 0x40_1000;
pub const USER_SP: u64 = 0x7fff_ffff_e008;
pub const USER_IP: u64 = 0x40_0000;
pub const AUX_BASE: u64 = 0xffff_8000_0010_0000;
pub const KERNEL_SP: u64 = 0xffff_8000_0020_0f37;

struct StdoutSink;

impl ConsoleSink for StdoutSink {
    fn write_str(&self, s: &str) {
        print!("{}", s);
    }
}

static STDOUT_SINK: StdoutSink = StdoutSink;
static LOGGER: Once = Once::new();

/// Route the crate's log output to the test's stdout
pub fn init_logging() {
    LOGGER.call_once(|| {
        if logger::init(log::LevelFilter::Debug).is_ok() {
            logger::attach_sink(&STDOUT_SINK);
        }
    });
}

/// Saved register state of the mock thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockEnv {
    pub sp: u64,
    pub ip: u64,
}

impl Default for MockEnv {
    fn default() -> Self {
        MockEnv {
            sp: USER_SP,
            ip: USER_IP,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockUContext {
    pub sp: u64,
    pub ip: u64,
}

/// What the host saw when a handler was entered
#[derive(Debug, Clone)]
pub struct HandlerRecord {
    pub target: ThreadId,
    pub signum: u32,
    pub handler: u64,
    pub restorer: u64,
    pub stack_pointer: u64,
    pub on_altstack: bool,
    pub siginfo: Option<SigInfo>,
    pub ucontext: Option<MockUContext>,
    /// Target thread's blocked mask while the handler ran
    pub blocked: SigSet,
    /// Auxiliary stack bookmark while the handler ran
    pub aux_frame: u64,
    /// `ss_flags` of the alternate stack while the handler ran
    pub altstack_flags: i32,
}

type HandlerHook = Box<dyn FnMut(&MockHost, &HandlerRecord)>;

pub struct MockHost {
    process: Arc<ProcessSignals>,
    threads: Vec<Arc<ThreadSignals>>,
    current: Mutex<ThreadId>,
    states: Mutex<HashMap<ThreadId, ThreadState>>,
    records: Mutex<Vec<HandlerRecord>>,
    terminated: Mutex<Option<(ThreadId, u32)>>,
    aux_frame: Mutex<u64>,
    kernel_sp: Mutex<u64>,
    rewrite_ip: Mutex<Option<u64>>,
    hook: Mutex<Option<HandlerHook>>,
}

impl MockHost {
    pub fn new(nthreads: usize) -> Self {
        Self::with_config(nthreads, SignalConfig::default())
    }

    pub fn with_config(nthreads: usize, config: SignalConfig) -> Self {
        init_logging();
        let process = process_desc_alloc(PID, &config);
        let threads = (0..nthreads as u64)
            .map(|i| thread_desc_alloc(&process, ThreadId::new(FIRST_TID + i)))
            .collect();
        MockHost {
            process,
            threads,
            current: Mutex::new(ThreadId::new(FIRST_TID)),
            states: Mutex::new(HashMap::new()),
            records: Mutex::new(Vec::new()),
            terminated: Mutex::new(None),
            aux_frame: Mutex::new(AUX_BASE),
            kernel_sp: Mutex::new(KERNEL_SP),
            rewrite_ip: Mutex::new(None),
            hook: Mutex::new(None),
        }
    }

    pub fn signals(&self) -> &Arc<ProcessSignals> {
        &self.process
    }

    /// Thread descriptor by index in the thread list
    pub fn nth(&self, index: usize) -> &Arc<ThreadSignals> {
        &self.threads[index]
    }

    pub fn tid(&self, index: usize) -> ThreadId {
        self.threads[index].tid()
    }

    pub fn set_current(&self, index: usize) {
        *self.current.lock().unwrap() = self.tid(index);
    }

    pub fn set_state(&self, index: usize, state: ThreadState) {
        self.states.lock().unwrap().insert(self.tid(index), state);
    }

    pub fn install(&self, signum: u32, action: SignalAction) {
        self.process
            .set_action(self.threads.iter().map(Arc::as_ref), signum, action)
            .expect("set_action");
    }

    pub fn records(&self) -> Vec<HandlerRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn terminated(&self) -> Option<(ThreadId, u32)> {
        *self.terminated.lock().unwrap()
    }

    pub fn current_aux_frame(&self) -> u64 {
        *self.aux_frame.lock().unwrap()
    }

    /// Make SA_SIGINFO handlers rewrite the saved instruction pointer
    pub fn rewrite_ucontext_ip(&self, ip: u64) {
        *self.rewrite_ip.lock().unwrap() = Some(ip);
    }

    /// Run `hook` inside every handler invocation, with the host as argument
    pub fn on_handler(&self, hook: impl FnMut(&MockHost, &HandlerRecord) + 'static) {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn deliver(&self, env: &mut MockEnv) -> usize {
        deliver_all(self, env)
    }

    /// Deliver and expect the process to be terminated
    pub fn deliver_fatal(&self, env: &mut MockEnv) -> (ThreadId, u32) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| deliver_all(self, env)));
        assert!(result.is_err(), "delivery returned instead of terminating");
        self.terminated().expect("terminate was not called")
    }
}

impl ProcessRegistry for MockHost {
    fn current_pid(&self) -> ProcessId {
        PID
    }

    fn current_tid(&self) -> ThreadId {
        *self.current.lock().unwrap()
    }

    fn process(&self, pid: ProcessId) -> Option<Arc<ProcessSignals>> {
        (pid == PID).then(|| self.process.clone())
    }

    fn thread(&self, tid: ThreadId) -> Option<Arc<ThreadSignals>> {
        self.threads.iter().find(|t| t.tid() == tid).cloned()
    }

    fn threads(&self, pid: ProcessId) -> Vec<Arc<ThreadSignals>> {
        if pid == PID {
            self.threads.clone()
        } else {
            Vec::new()
        }
    }

    fn thread_state(&self, tid: ThreadId) -> ThreadState {
        self.states
            .lock()
            .unwrap()
            .get(&tid)
            .copied()
            .unwrap_or(ThreadState::Running)
    }

    fn terminate(&self, tid: ThreadId, signum: u32) -> ! {
        *self.terminated.lock().unwrap() = Some((tid, signum));
        panic!("tid {} terminated by signal {}", tid.as_u64(), signum);
    }
}

impl SignalArch for MockHost {
    type ExecEnv = MockEnv;
    type UContext = MockUContext;

    fn user_stack_pointer(&self, env: &MockEnv) -> u64 {
        env.sp
    }

    fn store_ucontext(&self, env: &MockEnv, uc: &mut MockUContext) {
        uc.sp = env.sp;
        uc.ip = env.ip;
    }

    fn load_ucontext(&self, uc: &MockUContext, env: &mut MockEnv) {
        env.sp = uc.sp;
        env.ip = uc.ip;
    }

    fn jump_to_handler(&self, _env: &mut MockEnv, call: HandlerCall<'_, MockUContext>) {
        let blocked = self
            .thread(call.target)
            .map(|t| t.blocked())
            .unwrap_or_default();

        let ucontext = call.ucontext.map(|uc| {
            let seen = *uc;
            if let Some(ip) = *self.rewrite_ip.lock().unwrap() {
                uc.ip = ip;
            }
            seen
        });

        let record = HandlerRecord {
            target: call.target,
            signum: call.signum,
            handler: call.handler,
            restorer: call.restorer,
            stack_pointer: call.stack_pointer,
            on_altstack: call.on_altstack,
            siginfo: call.siginfo.copied(),
            ucontext,
            blocked,
            aux_frame: self.current_aux_frame(),
            altstack_flags: self.process.altstack().ss_flags,
        };
        self.records.lock().unwrap().push(record.clone());

        // Handler code runs deeper on the kernel stack for nested syscalls
        *self.kernel_sp.lock().unwrap() -= 0x400;
        let hook = self.hook.lock().unwrap().take();
        if let Some(mut hook) = hook {
            hook(self, &record);
            *self.hook.lock().unwrap() = Some(hook);
        }
        *self.kernel_sp.lock().unwrap() += 0x400;
    }

    fn kernel_stack_pointer(&self) -> u64 {
        *self.kernel_sp.lock().unwrap()
    }

    fn aux_frame(&self) -> u64 {
        *self.aux_frame.lock().unwrap()
    }

    fn set_aux_frame(&self, fp: u64) {
        *self.aux_frame.lock().unwrap() = fp;
    }
}
