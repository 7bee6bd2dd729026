//! # Context Frames and Task Stacks
//!
//! The one place that knows how a suspended task's registers are laid out in
//! memory. Everything else in the kernel deals in typed TCB fields and word
//! offsets; only the PendSV handler in [`crate::arch`] turns an offset into a
//! live stack pointer.
//!
//! ## Saved Context Layout (Armv7-M, full descending stack)
//!
//! ```text
//! high address
//!   xPSR         ┐
//!   PC           │
//!   LR           │ hardware frame: stacked by the core on exception entry,
//!   R12          │ unstacked on exception return
//!   R3 .. R0     ┘
//!   EXC_RETURN   ┐
//!   R11 .. R4    ┘ software frame: stacked by PendSV     <- saved offset
//! low address
//!   ...
//!   guard words (fill pattern, never written by a healthy task)
//! ```
//!
//! Both switch triggers (tick interrupt and task-context yield) enter PendSV
//! through a regular exception entry, so the frame is identical whichever path
//! requested the switch.

use crate::config::STACK_WORDS;
use crate::task::TaskEntry;

/// Words the PendSV handler pushes: R4–R11 plus the EXC_RETURN value.
pub const SOFTWARE_FRAME_WORDS: usize = 9;

/// Words the core pushes on exception entry (no FPU state).
pub const HARDWARE_FRAME_WORDS: usize = 8;

/// A complete saved context.
pub const FRAME_WORDS: usize = SOFTWARE_FRAME_WORDS + HARDWARE_FRAME_WORDS;

/// xPSR with only the Thumb bit set; the only mode Armv7-M supports.
pub const DEFAULT_XPSR: u32 = 1 << 24;

/// Return to Thread mode on the process stack, basic (non-FPU) frame.
pub const EXC_RETURN_THREAD_PSP: u32 = 0xFFFF_FFFD;

/// Pattern every stack word holds until the task first writes it.
pub const STACK_FILL: u32 = 0xA5A5_A5A5;

/// Words at the bottom of every stack that must keep the fill pattern.
pub const GUARD_WORDS: usize = 4;

/// A saved register context, in memory order (lowest address first).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextFrame {
    /// R4–R11 as stacked by PendSV.
    pub r4_r11: [u32; 8],
    /// EXC_RETURN value PendSV branches through when resuming the task.
    pub exc_return: u32,
    pub r0: u32,
    pub r1: u32,
    pub r2: u32,
    pub r3: u32,
    pub r12: u32,
    pub lr: u32,
    pub pc: u32,
    pub xpsr: u32,
}

impl ContextFrame {
    /// The synthetic frame a task starts from. Returning from it lands on
    /// `entry` in Thumb state; should `entry` ever return, it lands on `exit`.
    pub fn bootstrap(entry: TaskEntry, exit: TaskEntry) -> Self {
        Self {
            r4_r11: [0; 8],
            exc_return: EXC_RETURN_THREAD_PSP,
            r0: 0,
            r1: 0,
            r2: 0,
            r3: 0,
            r12: 0,
            lr: code_address(exit),
            pc: code_address(entry),
            xpsr: DEFAULT_XPSR,
        }
    }

    /// Decode a frame from stack words starting at the saved offset.
    pub fn from_words(words: &[u32]) -> Option<Self> {
        let w = words.get(..FRAME_WORDS)?;
        let mut r4_r11 = [0; 8];
        r4_r11.copy_from_slice(&w[..8]);
        Some(Self {
            r4_r11,
            exc_return: w[8],
            r0: w[9],
            r1: w[10],
            r2: w[11],
            r3: w[12],
            r12: w[13],
            lr: w[14],
            pc: w[15],
            xpsr: w[16],
        })
    }

    /// Push this frame onto a full descending stack, hardware part first.
    fn push_onto(&self, pusher: &mut StackPusher<'_>) {
        pusher.push(self.xpsr);
        pusher.push(self.pc);
        pusher.push(self.lr);
        pusher.push(self.r12);
        pusher.push(self.r3);
        pusher.push(self.r2);
        pusher.push(self.r1);
        pusher.push(self.r0);

        pusher.push(self.exc_return);
        for &reg in self.r4_r11.iter().rev() {
            pusher.push(reg);
        }
    }
}

/// Addresses are 32 bits on the target. Host builds truncate, which only
/// matters for comparing frames in tests.
fn code_address(f: TaskEntry) -> u32 {
    f as usize as u32
}

/// A helper for pushing words onto a full descending stack held in a slice.
struct StackPusher<'a> {
    words: &'a mut [u32],
    top: usize,
}

impl<'a> StackPusher<'a> {
    /// Start pushing just below the end of `words`.
    fn new(words: &'a mut [u32]) -> Self {
        let top = words.len();
        StackPusher { words, top }
    }

    fn push(&mut self, value: u32) {
        self.top -= 1;
        self.words[self.top] = value;
    }

    /// Offset of the last word pushed.
    fn current(&self) -> usize {
        self.top
    }
}

/// A task's private stack, aligned as AAPCS requires.
#[repr(C, align(8))]
pub struct TaskStack {
    words: [u32; STACK_WORDS],
}

impl TaskStack {
    pub const fn new() -> Self {
        Self {
            words: [STACK_FILL; STACK_WORDS],
        }
    }

    /// Refill the stack and build the bootstrap frame at its top.
    ///
    /// Returns the saved-context offset for the new task.
    pub fn init_frame(&mut self, entry: TaskEntry, exit: TaskEntry) -> usize {
        self.words.fill(STACK_FILL);
        let mut pusher = StackPusher::new(&mut self.words);
        ContextFrame::bootstrap(entry, exit).push_onto(&mut pusher);
        pusher.current()
    }

    /// Read back the frame saved at `offset`.
    pub fn frame_at(&self, offset: usize) -> Option<ContextFrame> {
        ContextFrame::from_words(self.words.get(offset..)?)
    }

    /// Whether a saved context at `offset` fits between the guard words and
    /// the top of the stack.
    pub const fn holds_frame_at(offset: usize) -> bool {
        offset >= GUARD_WORDS && offset + FRAME_WORDS <= STACK_WORDS
    }

    /// Translate a raw stack pointer into a word offset within this stack.
    ///
    /// `None` when the pointer is outside the stack or misaligned.
    pub fn offset_of(&self, sp: *const u32) -> Option<usize> {
        let base = self.words.as_ptr() as usize;
        let delta = (sp as usize).checked_sub(base)?;
        if delta % 4 != 0 {
            return None;
        }
        let offset = delta / 4;
        (offset <= STACK_WORDS).then_some(offset)
    }

    /// Raw pointer to the word at `offset`, for the switch handler to load
    /// into PSP. The stack must not move while a task runs on it.
    pub fn pointer_at(&mut self, offset: usize) -> *mut u32 {
        self.words.as_mut_ptr().wrapping_add(offset)
    }

    /// Whether the guard words still hold the fill pattern.
    pub fn guard_intact(&self) -> bool {
        self.words[..GUARD_WORDS].iter().all(|&w| w == STACK_FILL)
    }

    /// Bytes at the bottom of the stack that have never been written.
    pub fn high_water_mark(&self) -> usize {
        self.words.iter().take_while(|&&w| w == STACK_FILL).count() * 4
    }

    #[cfg(test)]
    pub(crate) fn words_mut(&mut self) -> &mut [u32] {
        &mut self.words
    }
}

impl Default for TaskStack {
    fn default() -> Self {
        TaskStack::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn body() -> ! {
        loop {
            core::hint::spin_loop();
        }
    }

    extern "C" fn trap() -> ! {
        loop {
            core::hint::spin_loop();
        }
    }

    #[test]
    fn test_bootstrap_frame_layout() {
        let mut stack = TaskStack::new();
        let offset = stack.init_frame(body, trap);

        assert_eq!(offset, STACK_WORDS - FRAME_WORDS);

        let frame = stack.frame_at(offset).unwrap();
        assert_eq!(frame, ContextFrame::bootstrap(body, trap));
        assert_eq!(frame.xpsr, 0x0100_0000);
        assert_eq!(frame.pc, body as usize as u32);
        assert_eq!(frame.lr, trap as usize as u32);
        assert_eq!(frame.exc_return, EXC_RETURN_THREAD_PSP);
        assert_eq!(frame.r4_r11, [0; 8]);
    }

    #[test]
    fn test_hardware_frame_ends_aligned() {
        // The core unstacks the hardware frame from an 8-byte aligned address
        let mut stack = TaskStack::new();
        let offset = stack.init_frame(body, trap);
        let hw_start = stack.pointer_at(offset + SOFTWARE_FRAME_WORDS) as usize;
        assert_eq!(hw_start % 8, 0);
    }

    #[test]
    fn test_offset_round_trip() {
        let mut stack = TaskStack::new();
        let sp = stack.pointer_at(100);
        assert_eq!(stack.offset_of(sp), Some(100));
        let top = stack.pointer_at(STACK_WORDS);
        assert_eq!(stack.offset_of(top), Some(STACK_WORDS));
    }

    #[test]
    fn test_offset_rejects_foreign_pointers() {
        let mut stack = TaskStack::new();

        let below = stack.pointer_at(0).wrapping_sub(1);
        assert_eq!(stack.offset_of(below), None);

        let misaligned = (stack.pointer_at(10) as usize + 2) as *const u32;
        assert_eq!(stack.offset_of(misaligned), None);

        let above = stack.pointer_at(STACK_WORDS + 1);
        assert_eq!(stack.offset_of(above), None);
    }

    #[test]
    fn test_frame_bounds() {
        assert!(TaskStack::holds_frame_at(STACK_WORDS - FRAME_WORDS));
        assert!(!TaskStack::holds_frame_at(STACK_WORDS - FRAME_WORDS + 1));
        assert!(TaskStack::holds_frame_at(GUARD_WORDS));
        assert!(!TaskStack::holds_frame_at(GUARD_WORDS - 1));
    }

    #[test]
    fn test_guard_and_high_water_mark() {
        let mut stack = TaskStack::new();
        stack.init_frame(body, trap);
        assert!(stack.guard_intact());
        assert_eq!(stack.high_water_mark(), (STACK_WORDS - FRAME_WORDS) * 4);

        // Simulate deep usage that stops short of the guard
        stack.words_mut()[GUARD_WORDS] = 0;
        assert!(stack.guard_intact());
        assert_eq!(stack.high_water_mark(), GUARD_WORDS * 4);

        stack.words_mut()[1] = 0xDEAD_BEEF;
        assert!(!stack.guard_intact());
    }
}
