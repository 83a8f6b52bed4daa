//! Sequencers - elements that switch between sources over time
//!
//! [`Playlist`] plays its linked inputs back to back in port order. Only the
//! current input is demanded, so later inputs do not start decoding until
//! their turn. [`Queue`] owns its sources instead of linking them: new ones
//! are appended at runtime through the control queue and played as earlier
//! ones finish. Queued sources can be held, removed or cleared by
//! [`SourceId`], and each one that plays out raises
//! [`ElementNotice::SourceDone`].

use std::collections::VecDeque;

use super::{
    Element, ElementBase, ElementError, ElementNotice, ElementParam, ElementResult, PendingSource,
    PrepareContext, ProcessContext, SourceId, Status,
};
use crate::types::{Buffer, Format};

/// Sources a [`Queue`] can hold without growing
pub const QUEUE_CAPACITY: usize = 32;

/// Concatenates its inputs end to end
pub struct Playlist {
    base: ElementBase,
    current: usize,
}

impl Playlist {
    pub fn new(id: impl Into<String>, name: impl Into<String>, num_inputs: usize) -> Self {
        Self {
            base: ElementBase::new(id, name)
                .with_inputs("in", num_inputs.max(1))
                .with_output("out"),
            current: 0,
        }
    }

    /// Index of the input currently playing
    pub fn current(&self) -> usize {
        self.current
    }
}

impl Element for Playlist {
    fn base(&self) -> &ElementBase {
        &self.base
    }

    fn kind(&self) -> &'static str {
        "Playlist"
    }

    fn prepare(&mut self, ctx: &PrepareContext<'_>) -> ElementResult<Vec<Format>> {
        let format = self.base.common_input_format(ctx)?;
        self.current = 0;
        Ok(vec![format])
    }

    fn input_demand(&self, port: usize, frames: usize) -> usize {
        if port == self.current {
            frames
        } else {
            0
        }
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> ElementResult<Status> {
        let count = ctx.num_inputs();
        if self.current >= count {
            ctx.output(0).clear();
            return Ok(Status::Done);
        }
        let input = ctx.input(self.current);
        ctx.output(0).copy_from(input.buffer);
        if !input.ended {
            return Ok(Status::More);
        }
        // the next input is pulled on the following pass of this cycle
        self.current += 1;
        Ok(if self.current >= count {
            Status::Done
        } else {
            Status::More
        })
    }

    fn describe(&self) -> String {
        format!(
            "Playlist '{}' item {}/{}",
            self.name(),
            (self.current + 1).min(self.inputs().len()),
            self.inputs().len()
        )
    }
}

struct QueuedSource {
    id: SourceId,
    source: PendingSource,
    paused: bool,
}

/// FIFO of owned sources, fed one after another
///
/// Sources are prepared on the caller side with the queue's format before
/// they are handed in, and dropped through the deferred reclaimer once they
/// finish. With `keep_open` an empty queue plays silence and waits for more;
/// without it the queue finishes as soon as it runs dry.
///
/// The first source that is not held plays. While every remaining source is
/// held the queue plays silence, open or not.
pub struct Queue {
    base: ElementBase,
    format: Format,
    keep_open: bool,
    items: VecDeque<QueuedSource>,
    /// Sources that played out and have not been reported yet
    finished: VecDeque<SourceId>,
    scratch: Vec<Buffer>,
    played: u64,
}

impl Queue {
    pub fn new(id: impl Into<String>, name: impl Into<String>, format: Format, keep_open: bool) -> Self {
        Self {
            base: ElementBase::new(id, name).with_output("out"),
            format,
            keep_open,
            items: VecDeque::with_capacity(QUEUE_CAPACITY),
            finished: VecDeque::with_capacity(QUEUE_CAPACITY),
            scratch: Vec::new(),
            played: 0,
        }
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Sources that have finished playing since prepare
    pub fn played(&self) -> u64 {
        self.played
    }

    /// Ids of the sources still held, in play order
    pub fn source_ids(&self) -> impl Iterator<Item = SourceId> + '_ {
        self.items.iter().map(|item| item.id)
    }

    fn position(&self, id: SourceId) -> ElementResult<usize> {
        self.items
            .iter()
            .position(|item| item.id == id)
            .ok_or_else(|| ElementError::UnknownSource {
                element: self.name().to_string(),
                source_id: id,
            })
    }
}

impl Element for Queue {
    fn base(&self) -> &ElementBase {
        &self.base
    }

    fn kind(&self) -> &'static str {
        "Queue"
    }

    fn prepare(&mut self, ctx: &PrepareContext<'_>) -> ElementResult<Vec<Format>> {
        self.played = 0;
        self.finished.clear();
        self.reserve(ctx.max_frames());
        Ok(vec![self.format])
    }

    fn reserve(&mut self, max_frames: usize) {
        if self.scratch.first().map_or(true, |b| b.capacity() < max_frames) {
            self.scratch = vec![Buffer::with_capacity(self.format, max_frames)];
        }
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> ElementResult<Status> {
        let frames = ctx.frames();
        let out = ctx.output(0);
        out.clear();

        let mut written = 0;
        while written < frames {
            let Some(index) = self.items.iter().position(|item| !item.paused) else {
                break;
            };
            let item = &mut self.items[index];
            self.scratch[0].clear();
            let mut inner = ProcessContext::for_outputs(frames - written, &mut self.scratch);
            let status = item.source.element_mut().process(&mut inner)?;
            let got = self.scratch[0].frame_count();
            out.copy_frames(written, &self.scratch[0], 0, got);
            written += got;

            if status == Status::Done {
                // dropping the handle defers the source's shutdown
                if let Some(done) = self.items.remove(index) {
                    if self.finished.len() < self.finished.capacity() {
                        self.finished.push_back(done.id);
                    }
                }
                self.played += 1;
            } else if got == 0 {
                break;
            }
        }

        let holding = self.items.iter().all(|item| item.paused);
        if self.items.is_empty() && !self.keep_open {
            return Ok(Status::Done);
        }
        if holding {
            out.silence_range(written, frames);
            out.set_frame_count(frames);
        }
        Ok(Status::More)
    }

    fn set_param(&mut self, param: ElementParam) -> ElementResult<()> {
        match param {
            ElementParam::PauseSource { source, paused } => {
                let index = self.position(source)?;
                self.items[index].paused = paused;
                Ok(())
            }
            ElementParam::RemoveSource(source) => {
                let index = self.position(source)?;
                self.items.remove(index);
                Ok(())
            }
            ElementParam::ClearSources => {
                self.items.clear();
                Ok(())
            }
            other => Err(self.base.unsupported(&other)),
        }
    }

    fn enqueue(&mut self, id: SourceId, source: PendingSource) -> Result<(), PendingSource> {
        if self.items.len() >= QUEUE_CAPACITY {
            return Err(source);
        }
        self.items.push_back(QueuedSource {
            id,
            source,
            paused: false,
        });
        Ok(())
    }

    fn take_notice(&mut self) -> Option<ElementNotice> {
        self.finished.pop_front().map(ElementNotice::SourceDone)
    }

    fn shutdown(&mut self) {
        self.items.clear();
    }

    fn describe(&self) -> String {
        format!(
            "Queue '{}' {} pending, {} played",
            self.name(),
            self.items.len(),
            self.played
        )
    }
}
