//! Audio graphs - element composition and the pull loop
//!
//! A [`Graph`] owns a set of elements and the links between their ports.
//! Preparing it fixes everything the audio thread needs:
//!
//! 1. Kahn topological sort (a cycle is [`ElementError::CyclicGraph`])
//! 2. every input port checked for exactly one link
//! 3. element `prepare` in order, each seeing its upstream formats
//! 4. per-element frame capacities, computed backwards from the output
//! 5. one flat arena of port buffers laid out in topological order
//!
//! # Pull model
//!
//! A pass first walks the order backwards to work out how many frames every
//! element is asked for ([`Element::input_demand`]); elements nobody asks
//! anything of are skipped, which is how sequencers keep later inputs idle.
//! It then walks forward, processing every demanded element into its slots.
//! An element feeding several consumers is asked for the smallest non-zero
//! demand among them.
//!
//! `Graph::process` repeats passes until the request is filled or the output
//! element reports done, so individual elements may return short mid-stream
//! while the graph as a whole only returns short at end-of-stream. If the
//! pass budget runs out first (a proxied source underrunning) the remainder
//! is padded with silence and counted.

pub mod class;
pub mod factory;

pub use class::{ArgValue, ElementDesc, GraphClass, LinkDesc};
pub use factory::{create_element, ElementArgs};

use std::collections::VecDeque;
use std::fmt::Write as _;

use crate::element::{
    Element, ElementBase, ElementError, ElementNotice, ElementParam, ElementResult, ElementSlot,
    PendingSource, PrepareContext, ProcessContext, SourceId, Status,
};
use crate::loader::{IoStrategy, ResourceLoader};
use crate::types::{Buffer, Format};

/// Passes one `process` call may run before padding with silence
pub const MAX_PASSES: usize = 64;

/// A connection from an output port to an input port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub src: usize,
    pub src_port: usize,
    pub dst: usize,
    pub dst_port: usize,
}

/// Everything fixed at prepare time
struct Plan {
    order: Vec<usize>,
    formats: Vec<Vec<Format>>,
    capacity: Vec<usize>,
    slot_base: Vec<usize>,
    /// Link index feeding each input port
    input_links: Vec<Vec<usize>>,
    /// Arena slot feeding each input port
    input_slots: Vec<Vec<usize>>,
    buffers: Vec<Buffer>,
    ended: Vec<bool>,
    demanded: Vec<usize>,
    done: Vec<bool>,
    sinks: Vec<usize>,
    output_node: usize,
    output_slot: usize,
}

/// Take the smaller of two demands, where 0 means "nothing asked yet"
fn merge_demand(slot: &mut usize, want: usize) {
    *slot = if *slot == 0 { want } else { (*slot).min(want) };
}

/// A directed acyclic composition of elements with one output port
pub struct Graph {
    base: ElementBase,
    nodes: Vec<ElementSlot>,
    links: Vec<Link>,
    output: Option<(usize, usize)>,
    plan: Option<Plan>,
    finished: bool,
    short_pulls: u64,
}

impl Graph {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            base: ElementBase::new(id, name).with_output("out"),
            nodes: Vec::new(),
            links: Vec::new(),
            output: None,
            plan: None,
            finished: false,
            short_pulls: 0,
        }
    }

    /// Add an element, returning its index
    pub fn add(&mut self, element: impl Element + 'static) -> usize {
        self.add_boxed(Box::new(element))
    }

    pub fn add_boxed(&mut self, element: Box<dyn Element>) -> usize {
        self.plan = None;
        self.nodes.push(ElementSlot::new(element));
        self.nodes.len() - 1
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Index of the first element with this name
    pub fn find(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|slot| slot.element().name() == name)
    }

    pub fn element(&self, index: usize) -> Option<&dyn Element> {
        self.nodes.get(index).map(ElementSlot::element)
    }

    pub fn element_mut(&mut self, index: usize) -> Option<&mut dyn Element> {
        self.nodes.get_mut(index).map(ElementSlot::element_mut)
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    fn slot(&self, index: usize) -> ElementResult<&dyn Element> {
        self.element(index)
            .ok_or_else(|| ElementError::UnknownElement(format!("#{index}")))
    }

    fn output_port_index(&self, element: usize, port: &str) -> ElementResult<usize> {
        let element = self.slot(element)?;
        element
            .outputs()
            .iter()
            .position(|p| p.name == port)
            .ok_or_else(|| ElementError::UnknownPort {
                element: element.name().to_string(),
                port: port.to_string(),
            })
    }

    fn input_port_index(&self, element: usize, port: &str) -> ElementResult<usize> {
        let element = self.slot(element)?;
        element
            .inputs()
            .iter()
            .position(|p| p.name == port)
            .ok_or_else(|| ElementError::UnknownPort {
                element: element.name().to_string(),
                port: port.to_string(),
            })
    }

    fn duplicate(&self, element: usize, port: &str) -> ElementError {
        ElementError::DuplicateLink {
            element: self.nodes[element].element().name().to_string(),
            port: port.to_string(),
        }
    }

    /// Link `src:src_port` to `dst:dst_port` by port name
    pub fn link(&mut self, src: usize, src_port: &str, dst: usize, dst_port: &str) -> ElementResult<()> {
        let sp = self.output_port_index(src, src_port)?;
        let dp = self.input_port_index(dst, dst_port)?;
        self.link_ports(src, sp, dst, dp)
    }

    /// Link by element name and port name
    pub fn link_named(&mut self, src: &str, src_port: &str, dst: &str, dst_port: &str) -> ElementResult<()> {
        let s = self.find(src).ok_or_else(|| ElementError::UnknownElement(src.to_string()))?;
        let d = self.find(dst).ok_or_else(|| ElementError::UnknownElement(dst.to_string()))?;
        self.link(s, src_port, d, dst_port)
    }

    /// Link by port index
    pub fn link_ports(&mut self, src: usize, src_port: usize, dst: usize, dst_port: usize) -> ElementResult<()> {
        let out_name = self
            .slot(src)?
            .outputs()
            .get(src_port)
            .map(|p| p.name.clone())
            .ok_or_else(|| ElementError::UnknownPort {
                element: self.nodes[src].element().name().to_string(),
                port: src_port.to_string(),
            })?;
        let in_name = self
            .slot(dst)?
            .inputs()
            .get(dst_port)
            .map(|p| p.name.clone())
            .ok_or_else(|| ElementError::UnknownPort {
                element: self.nodes[dst].element().name().to_string(),
                port: dst_port.to_string(),
            })?;

        if self.links.iter().any(|l| l.dst == dst && l.dst_port == dst_port) {
            return Err(self.duplicate(dst, &in_name));
        }
        if self.output == Some((src, src_port))
            || self.links.iter().any(|l| l.src == src && l.src_port == src_port)
        {
            return Err(self.duplicate(src, &out_name));
        }
        self.links.push(Link {
            src,
            src_port,
            dst,
            dst_port,
        });
        self.plan = None;
        Ok(())
    }

    /// Link the first free output of `src` to the first free input of `dst`
    pub fn connect(&mut self, src: usize, dst: usize) -> ElementResult<()> {
        let src_ports = self.slot(src)?.outputs().len();
        let dst_ports = self.slot(dst)?.inputs().len();
        let sp = (0..src_ports)
            .find(|&p| {
                self.output != Some((src, p)) && !self.links.iter().any(|l| l.src == src && l.src_port == p)
            })
            .ok_or_else(|| self.duplicate(src, "out"))?;
        let dp = (0..dst_ports)
            .find(|&p| !self.links.iter().any(|l| l.dst == dst && l.dst_port == p))
            .ok_or_else(|| self.duplicate(dst, "in"))?;
        self.link_ports(src, sp, dst, dp)
    }

    /// Designate the port the graph renders from
    pub fn set_output(&mut self, element: usize, port: &str) -> ElementResult<()> {
        let p = self.output_port_index(element, port)?;
        if self.links.iter().any(|l| l.src == element && l.src_port == p) {
            return Err(self.duplicate(element, port));
        }
        self.output = Some((element, p));
        self.plan = None;
        Ok(())
    }

    pub fn is_prepared(&self) -> bool {
        self.plan.is_some()
    }

    /// Prepare as a top-level graph
    pub fn prepare_with(
        &mut self,
        max_frames: usize,
        loader: &dyn ResourceLoader,
        strategy: IoStrategy,
    ) -> ElementResult<Format> {
        let ctx = PrepareContext::new(&[], max_frames, loader).with_strategy(strategy);
        let formats = self.prepare(&ctx)?;
        Ok(formats[0])
    }

    /// Processing order fixed at prepare
    pub fn order(&self) -> Option<&[usize]> {
        self.plan.as_ref().map(|p| p.order.as_slice())
    }

    pub fn output_format(&self) -> Option<Format> {
        let plan = self.plan.as_ref()?;
        let (node, port) = self.output?;
        plan.formats[node].get(port).copied()
    }

    /// Output formats negotiated for one element
    pub fn element_formats(&self, index: usize) -> Option<&[Format]> {
        self.plan.as_ref()?.formats.get(index).map(Vec::as_slice)
    }

    /// Largest frame count element `index` is ever asked for
    pub fn element_capacity(&self, index: usize) -> Option<usize> {
        self.plan.as_ref()?.capacity.get(index).copied()
    }

    /// Pulls that had to be padded with silence
    pub fn short_pulls(&self) -> u64 {
        self.short_pulls
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Render up to `frames` frames into `out`
    pub fn render(&mut self, out: &mut Buffer, frames: usize) -> ElementResult<Status> {
        let mut ctx = ProcessContext::for_outputs(frames, std::slice::from_mut(out));
        self.process(&mut ctx)
    }

    /// Deliver a parameter to one element
    pub fn set_element_param(&mut self, index: usize, param: ElementParam) -> ElementResult<()> {
        match self.nodes.get_mut(index) {
            Some(slot) => slot.element_mut().set_param(param),
            None => Err(ElementError::UnknownElement(format!("#{index}"))),
        }
    }

    /// Hand a prepared source to a sequencer element
    pub fn enqueue_into(
        &mut self,
        index: usize,
        id: SourceId,
        source: PendingSource,
    ) -> Result<(), PendingSource> {
        match self.nodes.get_mut(index) {
            Some(slot) => slot.element_mut().enqueue(id, source),
            None => Err(source),
        }
    }

    /// Hand every pending element notice to `f` with the raising element's index
    pub fn drain_notices(&mut self, mut f: impl FnMut(usize, ElementNotice)) {
        for (index, slot) in self.nodes.iter_mut().enumerate() {
            while let Some(notice) = slot.element_mut().take_notice() {
                f(index, notice);
            }
        }
    }

    fn topological_order(&self) -> ElementResult<Vec<usize>> {
        let n = self.nodes.len();
        let mut indegree = vec![0usize; n];
        for link in &self.links {
            indegree[link.dst] += 1;
        }
        let mut ready: VecDeque<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(node) = ready.pop_front() {
            order.push(node);
            for link in self.links.iter().filter(|l| l.src == node) {
                indegree[link.dst] -= 1;
                if indegree[link.dst] == 0 {
                    ready.push_back(link.dst);
                }
            }
        }
        if order.len() != n {
            return Err(ElementError::CyclicGraph {
                graph: self.name().to_string(),
            });
        }
        Ok(order)
    }

    /// One demand walk plus one processing walk
    fn pass(nodes: &mut [ElementSlot], links: &[Link], plan: &mut Plan, frames: usize) -> ElementResult<()> {
        for buffer in plan.buffers.iter_mut() {
            buffer.clear();
        }
        plan.demanded.fill(0);
        merge_demand(&mut plan.demanded[plan.output_node], frames);
        for &sink in &plan.sinks {
            merge_demand(&mut plan.demanded[sink], frames);
        }

        for &node in plan.order.iter().rev() {
            let wanted = plan.demanded[node];
            if wanted == 0 || plan.done[node] {
                continue;
            }
            let element = nodes[node].element();
            for (port, &link) in plan.input_links[node].iter().enumerate() {
                let demand = element.input_demand(port, wanted);
                if demand > 0 {
                    let src = links[link].src;
                    merge_demand(&mut plan.demanded[src], demand.min(plan.capacity[src]));
                }
            }
        }

        for &node in &plan.order {
            let wanted = plan.demanded[node];
            if wanted == 0 || plan.done[node] {
                continue;
            }
            let base = plan.slot_base[node];
            let count = plan.formats[node].len();
            let (upstream, rest) = plan.buffers.split_at_mut(base);
            let mut ctx = ProcessContext::new(
                wanted,
                upstream,
                &plan.ended[..base],
                &plan.input_slots[node],
                &mut rest[..count],
            );
            let status = nodes[node].element_mut().process(&mut ctx)?;
            if status == Status::Done {
                plan.done[node] = true;
                plan.ended[base..base + count].fill(true);
            }
        }
        Ok(())
    }
}

impl Element for Graph {
    fn base(&self) -> &ElementBase {
        &self.base
    }

    fn kind(&self) -> &'static str {
        "Graph"
    }

    fn prepare(&mut self, ctx: &PrepareContext<'_>) -> ElementResult<Vec<Format>> {
        let (output_node, output_port) = self.output.ok_or_else(|| ElementError::UnlinkedPort {
            element: self.name().to_string(),
            port: "output".to_string(),
        })?;
        let n = self.nodes.len();
        let order = self.topological_order()?;

        let mut input_links: Vec<Vec<Option<usize>>> = self
            .nodes
            .iter()
            .map(|slot| vec![None; slot.element().inputs().len()])
            .collect();
        for (i, link) in self.links.iter().enumerate() {
            input_links[link.dst][link.dst_port] = Some(i);
        }
        let mut linked = Vec::with_capacity(n);
        for (node, ports) in input_links.into_iter().enumerate() {
            let element = self.nodes[node].element();
            let mut resolved = Vec::with_capacity(ports.len());
            for (port, link) in ports.into_iter().enumerate() {
                match link {
                    Some(link) => resolved.push(link),
                    None => {
                        return Err(ElementError::UnlinkedPort {
                            element: element.name().to_string(),
                            port: element.inputs()[port].name.clone(),
                        })
                    }
                }
            }
            linked.push(resolved);
        }
        let input_links = linked;

        let mut formats: Vec<Vec<Format>> = vec![Vec::new(); n];
        for &node in &order {
            let upstream: Vec<Format> = input_links[node]
                .iter()
                .map(|&l| {
                    let link = self.links[l];
                    formats[link.src][link.src_port]
                })
                .collect();
            let element = self.nodes[node].element_mut();
            let produced = element.prepare(&ctx.for_inputs(&upstream))?;
            if produced.len() != element.outputs().len() {
                return Err(ElementError::invalid_argument(
                    element.name(),
                    "outputs",
                    format!("{} formats for {} ports", produced.len(), element.outputs().len()),
                ));
            }
            log::debug!("Prepared {} -> {:?}", element.describe(), produced);
            formats[node] = produced;
        }

        // frames each element may be asked for, walking back from the output
        let max_frames = ctx.max_frames().max(1);
        let mut capacity = vec![0usize; n];
        capacity[output_node] = max_frames;
        for &node in order.iter().rev() {
            if capacity[node] == 0 {
                capacity[node] = max_frames;
            }
            let element = self.nodes[node].element();
            for (port, &l) in input_links[node].iter().enumerate() {
                let src = self.links[l].src;
                capacity[src] = capacity[src].max(element.max_input_frames(port, capacity[node]));
            }
        }
        for &node in &order {
            self.nodes[node].element_mut().reserve(capacity[node]);
        }

        let mut slot_base = vec![0usize; n];
        let mut buffers = Vec::new();
        for &node in &order {
            slot_base[node] = buffers.len();
            for format in &formats[node] {
                buffers.push(Buffer::with_capacity(*format, capacity[node]));
            }
        }
        let input_slots: Vec<Vec<usize>> = input_links
            .iter()
            .map(|ports| {
                ports
                    .iter()
                    .map(|&l| {
                        let link = self.links[l];
                        slot_base[link.src] + link.src_port
                    })
                    .collect()
            })
            .collect();
        let sinks = order
            .iter()
            .copied()
            .filter(|&node| node != output_node && self.nodes[node].element().outputs().is_empty())
            .collect();
        let output_format = formats[output_node][output_port];
        let slots = buffers.len();

        log::debug!(
            "Graph '{}' prepared: {} elements, {} links, output {}",
            self.name(),
            n,
            self.links.len(),
            output_format
        );
        self.plan = Some(Plan {
            order,
            formats,
            capacity,
            output_slot: slot_base[output_node] + output_port,
            slot_base,
            input_links,
            input_slots,
            buffers,
            ended: vec![false; slots],
            demanded: vec![0; n],
            done: vec![false; n],
            sinks,
            output_node,
        });
        self.finished = false;
        self.short_pulls = 0;
        Ok(vec![output_format])
    }

    fn reserve(&mut self, max_frames: usize) {
        let Some(plan) = self.plan.as_mut() else {
            return;
        };
        if plan.capacity[plan.output_node] >= max_frames {
            return;
        }
        // grow the output path; upstream capacities follow on the next prepare
        let node = plan.output_node;
        plan.capacity[node] = max_frames;
        let base = plan.slot_base[node];
        for (i, format) in plan.formats[node].iter().enumerate() {
            plan.buffers[base + i] = Buffer::with_capacity(*format, max_frames);
        }
        self.nodes[node].element_mut().reserve(max_frames);
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> ElementResult<Status> {
        let frames = ctx.frames();
        let out = ctx.output(0);
        out.clear();
        let Self {
            base,
            nodes,
            links,
            plan,
            finished,
            short_pulls,
            ..
        } = self;
        let Some(plan) = plan.as_mut() else {
            return Err(ElementError::NotPrepared(base.name().to_string()));
        };

        let mut passes = 0;
        while !*finished && out.frame_count() < frames && passes < MAX_PASSES {
            let want = (frames - out.frame_count()).min(plan.capacity[plan.output_node]);
            Self::pass(nodes, links, plan, want)?;
            let produced = &plan.buffers[plan.output_slot];
            out.copy_frames(out.frame_count(), produced, 0, produced.frame_count());
            *finished = plan.done[plan.output_node];
            passes += 1;
        }

        if !*finished && out.frame_count() < frames {
            *short_pulls += 1;
            let at = out.frame_count();
            out.silence_range(at, frames);
            out.set_frame_count(frames);
        }
        Ok(if *finished { Status::Done } else { Status::More })
    }

    /// Notices of a nested graph surface as raised by the graph itself
    fn take_notice(&mut self) -> Option<ElementNotice> {
        self.nodes
            .iter_mut()
            .find_map(|slot| slot.element_mut().take_notice())
    }

    fn shutdown(&mut self) {
        for slot in &mut self.nodes {
            slot.shutdown();
        }
    }

    fn describe(&self) -> String {
        let order = match &self.plan {
            Some(plan) => plan.order.clone(),
            None => self
                .topological_order()
                .unwrap_or_else(|_| (0..self.nodes.len()).collect()),
        };
        let name_of = |i: usize| self.nodes[i].element().name();
        let mut text = format!("Graph '{}' ({} elements)", self.name(), self.nodes.len());
        for &node in &order {
            let _ = write!(text, "\n  [{node}] {}", self.nodes[node].element().describe());
        }
        for &node in &order {
            for link in self.links.iter().filter(|l| l.src == node) {
                let src = self.nodes[link.src].element();
                let dst = self.nodes[link.dst].element();
                let _ = write!(
                    text,
                    "\n  {}:{} -> {}:{}",
                    src.name(),
                    src.outputs()[link.src_port].name,
                    dst.name(),
                    dst.inputs()[link.dst_port].name
                );
            }
        }
        if let Some((node, port)) = self.output {
            let _ = write!(
                text,
                "\n  {}:{} -> [output]",
                name_of(node),
                self.nodes[node].element().outputs()[port].name
            );
        }
        text
    }
}
