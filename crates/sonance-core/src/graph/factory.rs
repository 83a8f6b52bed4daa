//! Element factory - builds library elements from their descriptions

use std::collections::BTreeMap;

use super::class::{ArgValue, ElementDesc};
use crate::element::{
    proxy, Converter, Delay, Element, ElementError, ElementResult, Fade, FadeDirection, FileSource,
    Gain, MakerChannel, Mixer, Null, Playlist, Proxy, Queue, Resampler, SineSource, Splitter,
    StereoJoiner, StereoMaker, StereoSplitter, ZeroSource,
};
use crate::loader::IoStrategy;
use crate::types::{Format, SampleType};

/// Type names understood by [`create_element`]
pub const ELEMENT_KINDS: &[&str] = &[
    "ZeroSource",
    "SineSource",
    "FileSource",
    "Gain",
    "Delay",
    "Effect",
    "Resampler",
    "Mixer",
    "Splitter",
    "StereoSplitter",
    "StereoJoiner",
    "StereoMaker",
    "Converter",
    "Null",
    "Playlist",
    "Queue",
    "Proxy",
];

/// Typed view over an element's arguments
pub struct ElementArgs<'a> {
    element: &'a str,
    args: &'a BTreeMap<String, ArgValue>,
}

impl<'a> ElementArgs<'a> {
    pub fn new(desc: &'a ElementDesc) -> Self {
        Self {
            element: &desc.name,
            args: &desc.args,
        }
    }

    fn invalid(&self, key: &str, reason: &str) -> ElementError {
        ElementError::invalid_argument(self.element, key, reason)
    }

    pub fn f64_or(&self, key: &str, default: f64) -> ElementResult<f64> {
        match self.args.get(key) {
            None => Ok(default),
            Some(ArgValue::Float(v)) => Ok(*v),
            Some(ArgValue::Int(v)) => Ok(*v as f64),
            Some(_) => Err(self.invalid(key, "expected a number")),
        }
    }

    pub fn f32_or(&self, key: &str, default: f32) -> ElementResult<f32> {
        self.f64_or(key, default as f64).map(|v| v as f32)
    }

    pub fn u32_or(&self, key: &str, default: u32) -> ElementResult<u32> {
        match self.args.get(key) {
            None => Ok(default),
            Some(ArgValue::Int(v)) => u32::try_from(*v).map_err(|_| self.invalid(key, "out of range")),
            Some(_) => Err(self.invalid(key, "expected an integer")),
        }
    }

    pub fn usize_or(&self, key: &str, default: usize) -> ElementResult<usize> {
        match self.args.get(key) {
            None => Ok(default),
            Some(ArgValue::Int(v)) => usize::try_from(*v).map_err(|_| self.invalid(key, "out of range")),
            Some(_) => Err(self.invalid(key, "expected an integer")),
        }
    }

    pub fn bool_or(&self, key: &str, default: bool) -> ElementResult<bool> {
        match self.args.get(key) {
            None => Ok(default),
            Some(ArgValue::Bool(v)) => Ok(*v),
            Some(_) => Err(self.invalid(key, "expected true or false")),
        }
    }

    pub fn text(&self, key: &str) -> ElementResult<Option<&'a str>> {
        match self.args.get(key) {
            None => Ok(None),
            Some(ArgValue::Text(v)) => Ok(Some(v.as_str())),
            Some(_) => Err(self.invalid(key, "expected a string")),
        }
    }

    pub fn require_text(&self, key: &str) -> ElementResult<&'a str> {
        self.text(key)?.ok_or_else(|| self.invalid(key, "missing"))
    }

    pub fn format(&self, key: &str) -> ElementResult<Option<Format>> {
        match self.args.get(key) {
            None => Ok(None),
            Some(ArgValue::Format(f)) if f.is_valid() => Ok(Some(*f)),
            Some(_) => Err(self.invalid(key, "expected a valid format")),
        }
    }

    pub fn require_format(&self, key: &str) -> ElementResult<Format> {
        self.format(key)?.ok_or_else(|| self.invalid(key, "missing"))
    }

    pub fn sample_type(&self, key: &str) -> ElementResult<Option<SampleType>> {
        match self.text(key)? {
            None => Ok(None),
            Some(name) => SampleType::from_name(name)
                .map(Some)
                .ok_or_else(|| self.invalid(key, "unknown sample type")),
        }
    }

    pub fn element(&self, key: &str) -> ElementResult<&'a ElementDesc> {
        match self.args.get(key) {
            Some(ArgValue::Element(desc)) => Ok(desc),
            Some(_) => Err(self.invalid(key, "expected an element description")),
            None => Err(self.invalid(key, "missing")),
        }
    }
}

/// Build one element from its description
pub fn create_element(desc: &ElementDesc) -> ElementResult<Box<dyn Element>> {
    let args = ElementArgs::new(desc);
    let (id, name) = (desc.id.as_str(), desc.name.as_str());

    let element: Box<dyn Element> = match desc.kind.as_str() {
        "ZeroSource" => Box::new(ZeroSource::new(
            id,
            name,
            args.format("format")?.unwrap_or_default(),
            args.u32_or("duration_ms", 0)?,
        )),
        "SineSource" => {
            let frequency = args.f32_or("frequency", 440.0)?;
            if frequency <= 0.0 {
                return Err(ElementError::invalid_argument(name, "frequency", "must be positive"));
            }
            Box::new(
                SineSource::new(
                    id,
                    name,
                    args.format("format")?.unwrap_or_default(),
                    frequency,
                    args.u32_or("duration_ms", 0)?,
                )
                .with_amplitude(args.f32_or("amplitude", 1.0)?),
            )
        }
        "FileSource" => {
            let mut file = FileSource::new(id, name, args.require_text("path")?)
                .with_loops(args.u32_or("loops", 1)?);
            if let Some(io) = args.text("io")? {
                let strategy = IoStrategy::from_name(io)
                    .ok_or_else(|| ElementError::invalid_argument(name, "io", "expected preload or stream"))?;
                file = file.with_strategy(strategy);
            }
            if let Some(sample_type) = args.sample_type("sample_type")? {
                file = file.with_sample_type(sample_type);
            }
            Box::new(file)
        }
        "Gain" => Box::new(Gain::new(id, name, args.f32_or("gain", 1.0)?)),
        "Delay" => Box::new(Delay::new(id, name, args.u32_or("delay_ms", 0)?)),
        "Effect" | "Fade" => {
            let direction = args
                .text("direction")?
                .or(args.text("effect")?)
                .unwrap_or("in");
            let direction = FadeDirection::from_name(direction)
                .ok_or_else(|| ElementError::invalid_argument(name, "direction", "expected in or out"))?;
            Box::new(Fade::new(
                id,
                name,
                direction,
                args.u32_or("start_ms", 0)?,
                args.u32_or("duration_ms", 0)?,
            ))
        }
        "Resampler" => {
            let rate = args.u32_or("sample_rate", 0)?;
            if rate == 0 {
                return Err(ElementError::invalid_argument(name, "sample_rate", "missing"));
            }
            Box::new(Resampler::new(id, name, rate))
        }
        "Mixer" => Box::new(Mixer::new(id, name, args.usize_or("num_inputs", 2)?)),
        "Splitter" => Box::new(Splitter::new(id, name, args.usize_or("num_outputs", 2)?)),
        "StereoSplitter" => Box::new(StereoSplitter::new(id, name)),
        "StereoJoiner" => Box::new(StereoJoiner::new(id, name)),
        "StereoMaker" => {
            let channel = args.text("channel")?.unwrap_or("both");
            let channel = MakerChannel::from_name(channel)
                .ok_or_else(|| ElementError::invalid_argument(name, "channel", "expected left, right or both"))?;
            Box::new(StereoMaker::new(id, name, channel))
        }
        "Converter" => {
            let sample_type = args
                .sample_type("sample_type")?
                .ok_or_else(|| ElementError::invalid_argument(name, "sample_type", "missing"))?;
            Box::new(Converter::new(id, name, sample_type))
        }
        "Null" => Box::new(Null::new(id, name)),
        "Playlist" => Box::new(Playlist::new(id, name, args.usize_or("num_inputs", 2)?)),
        "Queue" => Box::new(Queue::new(
            id,
            name,
            args.require_format("format")?,
            args.bool_or("keep_open", false)?,
        )),
        "Proxy" => {
            let inner = create_element(args.element("source")?)?;
            if !inner.is_source() {
                return Err(ElementError::invalid_argument(name, "source", "must not have inputs"));
            }
            Box::new(Proxy::new(id, name, inner).with_depth(args.usize_or("depth", proxy::DEFAULT_DEPTH)?))
        }
        other => return Err(ElementError::UnknownKind(other.to_string())),
    };
    Ok(element)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_is_buildable() {
        let format = Format::default();
        for kind in ELEMENT_KINDS {
            let desc = ElementDesc::new("e", *kind)
                .arg("path", "a.wav")
                .arg("sample_rate", 48000u32)
                .arg("sample_type", "Float32")
                .arg("format", format)
                .arg("source", ElementDesc::new("s", "ZeroSource"));
            let element = create_element(&desc).unwrap();
            assert_eq!(element.name(), "e");
        }
    }

    #[test]
    fn test_arguments_are_typed() {
        let desc = ElementDesc::new("g", "Gain").arg("gain", "loud");
        assert!(matches!(
            create_element(&desc),
            Err(ElementError::InvalidArgument { arg, .. }) if arg == "gain"
        ));

        let desc = ElementDesc::new("s", "SineSource").arg("frequency", 220);
        let sine = create_element(&desc).unwrap();
        assert!(sine.describe().contains("220"));

        let desc = ElementDesc::new("f", "FileSource");
        assert!(create_element(&desc).is_err());
    }

    #[test]
    fn test_proxy_needs_a_source() {
        let desc = ElementDesc::new("p", "Proxy").arg("source", ElementDesc::new("g", "Gain"));
        assert!(create_element(&desc).is_err());
        let desc = ElementDesc::new("p", "Proxy");
        assert!(create_element(&desc).is_err());
    }
}
