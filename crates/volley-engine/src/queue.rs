use volley_core::errors::DispatchError;
use volley_core::ids::DispatchId;

/// Hard cap on recipients per submission or upload.
pub const MAX_RECIPIENTS: usize = 600;

/// One session's bulk-send job: the recipient list, the message variants,
/// and the cursor/pause/run flags the scheduler reads each tick.
///
/// A queue is created by the first submission or upload for its session and
/// then only ever superseded, never destroyed. A fresh submission replaces
/// everything and restarts at cursor zero; an upload replaces only the
/// recipient list and leaves cursor/paused/running untouched.
#[derive(Clone, Debug)]
pub struct DispatchQueue {
    id: DispatchId,
    recipients: Vec<String>,
    variants: Vec<String>,
    cursor: usize,
    paused: bool,
    running: bool,
    sends_since_break: u32,
    generation: u64,
}

impl DispatchQueue {
    /// Queue created by an accepted submission: starts Active at cursor zero.
    pub fn submitted(recipients: Vec<String>, variants: Vec<String>) -> Self {
        Self {
            id: DispatchId::new(),
            recipients,
            variants,
            cursor: 0,
            paused: false,
            running: true,
            sends_since_break: 0,
            generation: 0,
        }
    }

    /// Queue created by an upload before any submission: Idle, no variants
    /// yet. `continue` on this queue is rejected until variants exist.
    pub fn loaded(recipients: Vec<String>) -> Self {
        Self {
            id: DispatchId::new(),
            recipients,
            variants: Vec::new(),
            cursor: 0,
            paused: false,
            running: false,
            sends_since_break: 0,
            generation: 0,
        }
    }

    /// Reject a submission batch before any queue state changes.
    pub fn validate_submission(
        recipients: &[String],
        variants: &[String],
    ) -> Result<(), DispatchError> {
        if recipients.is_empty() {
            return Err(DispatchError::Validation("recipient list is empty".into()));
        }
        if variants.is_empty() {
            return Err(DispatchError::Validation("message list is empty".into()));
        }
        Self::validate_recipient_count(recipients)
    }

    /// The cap applies to uploads as well; an uncapped side door would make
    /// the submission cap meaningless.
    pub fn validate_recipients(recipients: &[String]) -> Result<(), DispatchError> {
        if recipients.is_empty() {
            return Err(DispatchError::Validation("recipient list is empty".into()));
        }
        Self::validate_recipient_count(recipients)
    }

    fn validate_recipient_count(recipients: &[String]) -> Result<(), DispatchError> {
        if recipients.len() > MAX_RECIPIENTS {
            return Err(DispatchError::Validation(format!(
                "{} recipients exceeds the cap of {MAX_RECIPIENTS}",
                recipients.len()
            )));
        }
        Ok(())
    }

    /// Replace everything and restart from zero. Bumps the generation so a
    /// scheduler tick still in flight for the old contents discards itself.
    pub fn replace(&mut self, recipients: Vec<String>, variants: Vec<String>) {
        self.id = DispatchId::new();
        self.recipients = recipients;
        self.variants = variants;
        self.cursor = 0;
        self.paused = false;
        self.running = true;
        self.sends_since_break = 0;
        self.generation += 1;
    }

    /// Upload path: swap the recipient list, keep cursor/paused/running.
    pub fn replace_recipients(&mut self, recipients: Vec<String>) {
        self.recipients = recipients;
    }

    /// Identity of the submission currently occupying this queue.
    pub fn id(&self) -> &DispatchId {
        &self.id
    }

    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    pub fn variants(&self) -> &[String] {
        &self.variants
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.recipients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty()
    }

    pub fn paused(&self) -> bool {
        self.paused
    }

    pub fn running(&self) -> bool {
        self.running
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn sends_since_break(&self) -> u32 {
        self.sends_since_break
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    /// The cursor has passed the last recipient; an uploaded list shorter
    /// than the preserved cursor counts as exhausted too.
    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.recipients.len()
    }

    /// One attempt resolved (sent or failed): move past it.
    pub fn advance(&mut self) {
        self.cursor += 1;
        self.sends_since_break += 1;
    }

    /// A cooldown gate fired; start counting toward the next one.
    pub fn reset_break_counter(&mut self) {
        self.sends_since_break = 0;
    }
}
