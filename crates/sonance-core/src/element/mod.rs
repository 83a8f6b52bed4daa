//! Audio elements - the processing nodes of a graph
//!
//! Every node in an audio graph implements [`Element`]: sources produce
//! PCM, transforms reshape it, combiners sum it and sequencers switch
//! between inputs over time. The lifecycle is uniform:
//!
//! ```text
//!   prepare(upstream formats) ──► process(K frames) ... ──► shutdown()
//!        caller thread              audio thread          cleanup pass
//! ```
//!
//! # Real-time contract
//!
//! `process` runs on the audio thread. It must not block, lock, perform
//! IO syscalls on a cold path, or allocate. All storage it needs is sized
//! in `prepare` (or `reserve`), and output buffers are owned by the graph
//! and handed in pre-allocated.
//!
//! # Short results
//!
//! An element may produce fewer frames than requested in a single call
//! (a resampler still filling its chunk, a playlist switching inputs).
//! The graph keeps pulling within the same cycle, so only the graph as a
//! whole is bound to return short exclusively at end-of-stream.

mod error;

pub mod channels;
pub mod delay;
pub mod effect;
pub mod file;
pub mod gain;
pub mod mixer;
pub mod proxy;
pub mod resampler;
pub mod sequence;
pub mod source;

pub use channels::{Converter, MakerChannel, Null, Splitter, StereoJoiner, StereoMaker, StereoSplitter};
pub use delay::Delay;
pub use effect::{Fade, FadeDirection};
pub use error::{ElementError, ElementResult};
pub use file::FileSource;
pub use gain::Gain;
pub use mixer::Mixer;
pub use proxy::Proxy;
pub use resampler::Resampler;
pub use sequence::{Playlist, Queue};
pub use source::{SineSource, ZeroSource};

use crate::loader::{IoStrategy, NoResources, ResourceLoader};
use crate::types::{Buffer, Format};

/// Result of one `process` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// More data will follow
    More,
    /// The frames written by this call are the last ones
    Done,
}

/// A named input or output port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub name: String,
}

impl Port {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Runtime parameter updates delivered through the control queue
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ElementParam {
    /// Linear gain factor
    Gain(f32),
    /// Oscillator frequency in Hz
    Frequency(f32),
    /// Restart a fade from the current position
    Fade {
        direction: FadeDirection,
        duration_ms: u32,
    },
    /// Hold or release one input of a mixer; a held input contributes silence
    PauseInput { port: usize, paused: bool },
    /// Hold or release one source waiting in or playing from a queue
    PauseSource { source: SourceId, paused: bool },
    /// Drop one source from a queue, playing or not
    RemoveSource(SourceId),
    /// Drop every source of a queue
    ClearSources,
}

impl ElementParam {
    pub fn name(&self) -> &'static str {
        match self {
            ElementParam::Gain(_) => "gain",
            ElementParam::Frequency(_) => "frequency",
            ElementParam::Fade { .. } => "fade",
            ElementParam::PauseInput { .. } => "pause-input",
            ElementParam::PauseSource { .. } => "pause-source",
            ElementParam::RemoveSource(_) => "remove-source",
            ElementParam::ClearSources => "clear-sources",
        }
    }
}

/// Identifies one source handed to a queue at runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u64);

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "source #{}", self.0)
    }
}

/// Something an element has to report to the player, collected after each
/// render with [`Element::take_notice`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementNotice {
    /// A queued source played to its end and left the queue
    SourceDone(SourceId),
    /// A fade reached its target level
    FadeDone(FadeDirection),
}

/// Identity and ports shared by every element
#[derive(Debug, Clone)]
pub struct ElementBase {
    id: String,
    name: String,
    inputs: Vec<Port>,
    outputs: Vec<Port>,
}

impl ElementBase {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Add an input port
    pub fn with_input(mut self, name: impl Into<String>) -> Self {
        self.inputs.push(Port::new(name));
        self
    }

    /// Add an output port
    pub fn with_output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(Port::new(name));
        self
    }

    /// Add `count` numbered ports named `{prefix}0..{prefix}N`
    pub fn with_inputs(mut self, prefix: &str, count: usize) -> Self {
        self.inputs
            .extend((0..count).map(|i| Port::new(format!("{prefix}{i}"))));
        self
    }

    pub fn with_outputs(mut self, prefix: &str, count: usize) -> Self {
        self.outputs
            .extend((0..count).map(|i| Port::new(format!("{prefix}{i}"))));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> &[Port] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Port] {
        &self.outputs
    }

    /// Error for an input whose format does not fit
    pub fn mismatch(&self, expected: impl Into<String>, found: Format) -> ElementError {
        ElementError::FormatMismatch {
            element: self.name.clone(),
            expected: expected.into(),
            found,
        }
    }

    /// Require every input to carry the same format and return it
    pub fn common_input_format(&self, ctx: &PrepareContext<'_>) -> ElementResult<Format> {
        let first = ctx.input(self, 0)?;
        for &format in ctx.inputs().iter().skip(1) {
            if format != first {
                return Err(self.mismatch(first.to_string(), format));
            }
        }
        Ok(first)
    }

    pub fn unsupported(&self, param: &ElementParam) -> ElementError {
        ElementError::UnsupportedParam {
            element: self.name.clone(),
            param: param.name(),
        }
    }
}

/// Everything an element may look at while preparing
pub struct PrepareContext<'a> {
    inputs: &'a [Format],
    max_frames: usize,
    loader: &'a dyn ResourceLoader,
    strategy: IoStrategy,
}

impl<'a> PrepareContext<'a> {
    pub fn new(inputs: &'a [Format], max_frames: usize, loader: &'a dyn ResourceLoader) -> Self {
        Self {
            inputs,
            max_frames,
            loader,
            strategy: IoStrategy::default(),
        }
    }

    pub fn with_strategy(mut self, strategy: IoStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Context for an element without inputs or resources
    pub fn source(max_frames: usize) -> PrepareContext<'static> {
        PrepareContext {
            inputs: &[],
            max_frames,
            loader: &NoResources,
            strategy: IoStrategy::default(),
        }
    }

    /// Upstream formats, one per input port
    pub fn inputs(&self) -> &[Format] {
        self.inputs
    }

    /// Format on input `port`
    pub fn input(&self, base: &ElementBase, port: usize) -> ElementResult<Format> {
        self.inputs.get(port).copied().ok_or_else(|| ElementError::UnlinkedPort {
            element: base.name().to_string(),
            port: base
                .inputs()
                .get(port)
                .map(|p| p.name.clone())
                .unwrap_or_else(|| port.to_string()),
        })
    }

    /// Largest frame count a single `process` call will be asked for
    pub fn max_frames(&self) -> usize {
        self.max_frames
    }

    pub fn loader(&self) -> &'a dyn ResourceLoader {
        self.loader
    }

    /// How file sources should read their resources
    pub fn io_strategy(&self) -> IoStrategy {
        self.strategy
    }

    /// Same resources and limits, different upstream formats
    pub fn for_inputs<'b>(&self, inputs: &'b [Format]) -> PrepareContext<'b>
    where
        'a: 'b,
    {
        PrepareContext {
            inputs,
            max_frames: self.max_frames,
            loader: self.loader,
            strategy: self.strategy,
        }
    }
}

/// One upstream buffer as seen by a consumer
#[derive(Debug, Clone, Copy)]
pub struct Input<'a> {
    pub buffer: &'a Buffer,
    /// Upstream has delivered its final frames (possibly in this buffer)
    pub ended: bool,
}

impl Input<'_> {
    pub fn frames(&self) -> usize {
        self.buffer.frame_count()
    }
}

/// Buffers for one `process` call
pub struct ProcessContext<'a> {
    frames: usize,
    buffers: &'a [Buffer],
    ended: &'a [bool],
    inputs: &'a [usize],
    outputs: &'a mut [Buffer],
}

impl<'a> ProcessContext<'a> {
    /// `inputs[i]` indexes the buffer in `buffers` that feeds input port `i`
    pub fn new(
        frames: usize,
        buffers: &'a [Buffer],
        ended: &'a [bool],
        inputs: &'a [usize],
        outputs: &'a mut [Buffer],
    ) -> Self {
        Self {
            frames,
            buffers,
            ended,
            inputs,
            outputs,
        }
    }

    /// Context for a source that writes into `outputs`
    pub fn for_outputs(frames: usize, outputs: &'a mut [Buffer]) -> Self {
        Self::new(frames, &[], &[], &[], outputs)
    }

    /// Requested frame count
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn input(&self, port: usize) -> Input<'a> {
        let slot = self.inputs[port];
        Input {
            buffer: &self.buffers[slot],
            ended: self.ended[slot],
        }
    }

    /// Check every input has ended
    pub fn all_inputs_ended(&self) -> bool {
        self.inputs.iter().all(|&slot| self.ended[slot])
    }

    pub fn output(&mut self, port: usize) -> &mut Buffer {
        &mut self.outputs[port]
    }

    pub fn outputs(&mut self) -> &mut [Buffer] {
        &mut *self.outputs
    }
}

/// Owned storage for an element queued into a sequencer at runtime
///
/// Dropping it on the audio thread only enqueues it; the element's
/// shutdown runs when the collector reclaims it.
pub type PendingSource = basedrop::Owned<ElementSlot>;

/// The core element trait - implemented by every graph node
pub trait Element: Send {
    fn base(&self) -> &ElementBase;

    /// Type name as used in graph class descriptions
    fn kind(&self) -> &'static str;

    fn id(&self) -> &str {
        self.base().id()
    }

    fn name(&self) -> &str {
        self.base().name()
    }

    fn inputs(&self) -> &[Port] {
        self.base().inputs()
    }

    fn outputs(&self) -> &[Port] {
        self.base().outputs()
    }

    fn is_source(&self) -> bool {
        self.inputs().is_empty()
    }

    /// Validate upstream formats and return one format per output port
    fn prepare(&mut self, ctx: &PrepareContext<'_>) -> ElementResult<Vec<Format>>;

    /// Size internal storage for calls of up to `max_frames` frames
    fn reserve(&mut self, _max_frames: usize) {}

    /// Frames this element wants from input `port` when asked for `frames`
    ///
    /// Returning 0 leaves the upstream side unprocessed for this pass.
    fn input_demand(&self, _port: usize, frames: usize) -> usize {
        frames
    }

    /// Upper bound of [`Element::input_demand`] for output calls of `max_frames`
    fn max_input_frames(&self, _port: usize, max_frames: usize) -> usize {
        max_frames
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> ElementResult<Status>;

    fn set_param(&mut self, param: ElementParam) -> ElementResult<()> {
        Err(self.base().unsupported(&param))
    }

    /// Hand a prepared source to a sequencer; non-sequencers give it back
    fn enqueue(&mut self, _id: SourceId, source: PendingSource) -> Result<(), PendingSource> {
        Err(source)
    }

    /// Pop the oldest notice raised during processing
    ///
    /// Called until it returns `None` after every render, so elements only
    /// need to hold what one render can raise.
    fn take_notice(&mut self) -> Option<ElementNotice> {
        None
    }

    /// Release resources acquired in prepare
    fn shutdown(&mut self) {}

    /// One-line state summary for diagnostics
    fn describe(&self) -> String {
        format!("{} '{}'", self.kind(), self.name())
    }
}

/// An element plus the guarantee that its shutdown runs exactly once
pub struct ElementSlot {
    element: Box<dyn Element>,
    shut_down: bool,
}

impl ElementSlot {
    pub fn new(element: Box<dyn Element>) -> Self {
        Self {
            element,
            shut_down: false,
        }
    }

    pub fn element(&self) -> &dyn Element {
        self.element.as_ref()
    }

    pub fn element_mut(&mut self) -> &mut dyn Element {
        self.element.as_mut()
    }

    /// Run the element's shutdown if it has not run yet
    pub fn shutdown(&mut self) {
        if !self.shut_down {
            self.shut_down = true;
            self.element.shutdown();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }
}

impl Drop for ElementSlot {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ElementSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementSlot")
            .field("element", &self.element.describe())
            .field("shut_down", &self.shut_down)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Drive single elements outside a graph

    use super::*;

    /// Prepare `element` and allocate its output buffers
    pub fn prepare(element: &mut dyn Element, inputs: &[Format], max_frames: usize) -> Vec<Buffer> {
        let ctx = PrepareContext::new(inputs, max_frames, &NoResources);
        let formats = element.prepare(&ctx).unwrap();
        element.reserve(max_frames);
        formats
            .into_iter()
            .map(|f| Buffer::with_capacity(f, max_frames))
            .collect()
    }

    /// Run one process call with the given `(buffer, ended)` inputs
    pub fn run(
        element: &mut dyn Element,
        inputs: &[(&Buffer, bool)],
        outputs: &mut [Buffer],
        frames: usize,
    ) -> Status {
        let buffers: Vec<Buffer> = inputs.iter().map(|(b, _)| (*b).clone()).collect();
        let ended: Vec<bool> = inputs.iter().map(|(_, e)| *e).collect();
        let index: Vec<usize> = (0..inputs.len()).collect();
        for out in outputs.iter_mut() {
            out.clear();
        }
        let mut ctx = ProcessContext::new(frames, &buffers, &ended, &index, outputs);
        element.process(&mut ctx).unwrap()
    }

    /// Pull a source until done, collecting every produced sample as f32
    pub fn drain(element: &mut dyn Element, outputs: &mut [Buffer], frames: usize, max_calls: usize) -> (Vec<f32>, usize) {
        let mut samples = Vec::new();
        for call in 1..=max_calls {
            let status = run(element, &[], outputs, frames);
            samples.extend(outputs[0].to_f32_vec());
            if status == Status::Done {
                return (samples, call);
            }
        }
        panic!("source did not finish within {max_calls} calls");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counting {
        base: ElementBase,
        shutdowns: Arc<AtomicUsize>,
    }

    impl Element for Counting {
        fn base(&self) -> &ElementBase {
            &self.base
        }
        fn kind(&self) -> &'static str {
            "Counting"
        }
        fn prepare(&mut self, _ctx: &PrepareContext<'_>) -> ElementResult<Vec<Format>> {
            Ok(vec![Format::default()])
        }
        fn process(&mut self, _ctx: &mut ProcessContext<'_>) -> ElementResult<Status> {
            Ok(Status::Done)
        }
        fn shutdown(&mut self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_slot_shuts_down_once() {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let mut slot = ElementSlot::new(Box::new(Counting {
            base: ElementBase::new("c", "counting").with_output("out"),
            shutdowns: shutdowns.clone(),
        }));
        slot.shutdown();
        slot.shutdown();
        drop(slot);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_numbered_ports() {
        let base = ElementBase::new("m", "mixer").with_inputs("in", 3).with_output("out");
        let names: Vec<_> = base.inputs().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["in0", "in1", "in2"]);
        assert_eq!(base.outputs()[0].name, "out");
    }

    #[test]
    fn test_default_param_is_unsupported() {
        let mut c = Counting {
            base: ElementBase::new("c", "counting"),
            shutdowns: Arc::new(AtomicUsize::new(0)),
        };
        let err = c.set_param(ElementParam::Gain(0.5)).unwrap_err();
        assert!(matches!(err, ElementError::UnsupportedParam { param: "gain", .. }));
    }
}
