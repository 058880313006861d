// src/streams/set.rs

//! Stream sets: tagged structs of child streams
//!
//! A stream set freezes to a sequence of `tag | size | payload` records in
//! ascending tag order, omitting zero-payload fields. Each type declares its
//! tag table with [`stream_set!`], the way the original stream framework
//! declared a streamDict, and picks one of three policies for tags it does
//! not recognize:
//!
//! - `Strict`: unknown tag fails the thaw
//! - `Skip`: unknown tags are dropped silently
//! - `Preserve`: unknown records are retained and re-emitted on freeze, so
//!   fields added by newer producers survive a round-trip through this code
//!
//! `diff`/`twm` recurse per field. A record with a zero-length payload
//! inside a *diff* means "unset this field"; inside a *freeze* such records
//! are never emitted.

use crate::error::{Error, Result};
use crate::streams::{SizeType, read_size, take, write_size};

/// Unknown-tag handling policy for a stream set type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownPolicy {
    Strict,
    Skip,
    Preserve,
}

/// Sentinel skip-set entry: when present, preserved unknown records are
/// left out of the freeze at every nesting level. Version-0 digests are
/// computed this way; version-1 digests include the unknown records.
pub const SKIP_UNKNOWN: &str = "__unknownRecords__";

/// Records preserved by a `Preserve`-policy stream set: `(tag, had a Large
/// size prefix, payload)`, kept sorted by tag. The prefix width is retained
/// so a re-freeze reproduces the input bytes exactly.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UnknownRecords(pub(crate) Vec<(u8, bool, Vec<u8>)>);

impl UnknownRecords {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, &[u8])> {
        self.0.iter().map(|(tag, _, payload)| (*tag, payload.as_slice()))
    }

    pub(crate) fn get(&self, tag: u8) -> Option<&(u8, bool, Vec<u8>)> {
        self.0.iter().find(|(t, _, _)| *t == tag)
    }

    pub(crate) fn insert(&mut self, tag: u8, large: bool, payload: Vec<u8>) {
        match self.0.iter_mut().find(|(t, _, _)| *t == tag) {
            Some(entry) => *entry = (tag, large, payload),
            None => {
                self.0.push((tag, large, payload));
                self.0.sort_by_key(|(t, _, _)| *t);
            }
        }
    }

    pub(crate) fn remove(&mut self, tag: u8) {
        self.0.retain(|(t, _, _)| *t != tag);
    }
}

/// Append one record
pub(crate) fn write_record(
    out: &mut Vec<u8>,
    tag: u8,
    size_type: SizeType,
    payload: &[u8],
) -> Result<()> {
    out.push(tag);
    write_size(out, size_type, payload.len())?;
    out.extend_from_slice(payload);
    Ok(())
}

/// Read one record; the Small/Large prefix form is self-describing
pub(crate) fn read_record<'a>(
    data: &'a [u8],
    pos: &mut usize,
    type_name: &'static str,
) -> Result<(u8, bool, &'a [u8])> {
    let tag = *data.get(*pos).ok_or(Error::Truncated(type_name))?;
    *pos += 1;
    let (len, large) = read_size(data, pos, type_name)?;
    let payload = take(data, pos, len, type_name)?;
    Ok((tag, large, payload))
}

/// Locate one record's payload inside frozen stream-set bytes without
/// thawing the whole set
pub fn find_record<'a>(
    tag: u8,
    frz: &'a [u8],
    type_name: &'static str,
) -> Result<Option<&'a [u8]>> {
    let mut pos = 0;
    while pos < frz.len() {
        let (rec_tag, _, payload) = read_record(frz, &mut pos, type_name)?;
        if rec_tag == tag {
            return Ok(Some(payload));
        }
    }
    Ok(None)
}

/// Locate and thaw a single field from frozen stream-set bytes
pub fn find_stream<T: crate::streams::Stream>(
    tag: u8,
    frz: &[u8],
    type_name: &'static str,
) -> Result<Option<T>> {
    match find_record(tag, frz, type_name)? {
        Some(payload) => Ok(Some(T::thaw(payload)?)),
        None => Ok(None),
    }
}

/// Declare a stream-set type: its unknown-tag policy and its tag table of
/// `tag => field: Type [SizeClass, "wireName"]` rows. Generates the struct,
/// the [`Stream`](crate::streams::Stream) impl, `freeze_ext` for
/// known/unknown split freezes, and a `FIELDS` table used to build digest
/// skip sets.
macro_rules! stream_set {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident ($policy:ident) {
            $(
                $(#[$fmeta:meta])*
                $tag:literal => $field:ident : $ftype:ty [$size:ident, $fname:expr],
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Default)]
        $vis struct $name {
            $(
                $(#[$fmeta])*
                pub $field: $ftype,
            )*
            pub(crate) unknown: $crate::streams::set::UnknownRecords,
        }

        impl $name {
            pub const UNKNOWN_POLICY: $crate::streams::set::UnknownPolicy =
                $crate::streams::set::UnknownPolicy::$policy;

            /// `(tag, wire name)` for every declared field, ascending by tag
            pub const FIELDS: &'static [(u8, &'static str)] = &[
                $( ($tag, $fname), )*
            ];

            /// Freeze with independent control over the known-field and
            /// preserved-unknown halves of the output
            pub fn freeze_ext(
                &self,
                skip: &$crate::streams::SkipSet,
                freeze_known: bool,
                freeze_unknown: bool,
            ) -> $crate::error::Result<Vec<u8>> {
                let mut records: Vec<(u8, $crate::streams::SizeType, Vec<u8>)> = Vec::new();
                if freeze_known {
                    $(
                        if !skip.contains($fname) {
                            let payload =
                                $crate::streams::Stream::freeze(&self.$field, skip)?;
                            if !payload.is_empty() {
                                records.push((
                                    $tag,
                                    $crate::streams::SizeType::$size,
                                    payload,
                                ));
                            }
                        }
                    )*
                }
                if freeze_unknown && !skip.contains($crate::streams::set::SKIP_UNKNOWN) {
                    for (tag, large, payload) in &self.unknown.0 {
                        let size_type = if *large {
                            $crate::streams::SizeType::Large
                        } else {
                            $crate::streams::SizeType::Small
                        };
                        records.push((*tag, size_type, payload.clone()));
                    }
                }
                records.sort_by_key(|(tag, _, _)| *tag);
                let mut out = Vec::new();
                for (tag, size_type, payload) in records {
                    $crate::streams::set::write_record(&mut out, tag, size_type, &payload)?;
                }
                Ok(out)
            }
        }

        impl $crate::streams::Stream for $name {
            fn freeze(
                &self,
                skip: &$crate::streams::SkipSet,
            ) -> $crate::error::Result<Vec<u8>> {
                self.freeze_ext(skip, true, true)
            }

            fn thaw(frz: &[u8]) -> $crate::error::Result<Self> {
                let mut new = Self::default();
                let mut pos = 0;
                while pos < frz.len() {
                    let (tag, large, payload) = $crate::streams::set::read_record(
                        frz,
                        &mut pos,
                        stringify!($name),
                    )?;
                    match tag {
                        $(
                            $tag => {
                                new.$field =
                                    <$ftype as $crate::streams::Stream>::thaw(payload)?;
                            }
                        )*
                        _ => match Self::UNKNOWN_POLICY {
                            $crate::streams::set::UnknownPolicy::Strict => {
                                return Err($crate::error::Error::UnknownTag {
                                    tag,
                                    type_name: stringify!($name),
                                });
                            }
                            $crate::streams::set::UnknownPolicy::Skip => {
                                tracing::debug!(
                                    tag,
                                    type_name = stringify!($name),
                                    "skipping unknown stream tag"
                                );
                            }
                            $crate::streams::set::UnknownPolicy::Preserve => {
                                new.unknown.insert(tag, large, payload.to_vec());
                            }
                        },
                    }
                }
                Ok(new)
            }

            fn diff(&self, them: &Self) -> $crate::error::Result<Option<Vec<u8>>> {
                let mut records: Vec<(u8, $crate::streams::SizeType, Vec<u8>)> = Vec::new();
                $(
                    if let Some(d) =
                        $crate::streams::Stream::diff(&self.$field, &them.$field)?
                    {
                        records.push(($tag, $crate::streams::SizeType::$size, d));
                    }
                )*
                if Self::UNKNOWN_POLICY == $crate::streams::set::UnknownPolicy::Preserve {
                    for (tag, large, payload) in &self.unknown.0 {
                        if them.unknown.get(*tag).map(|(_, _, p)| p) != Some(payload) {
                            let size_type = if *large {
                                $crate::streams::SizeType::Large
                            } else {
                                $crate::streams::SizeType::Small
                            };
                            records.push((*tag, size_type, payload.clone()));
                        }
                    }
                    for (tag, _, _) in &them.unknown.0 {
                        if self.unknown.get(*tag).is_none() {
                            records.push((*tag, $crate::streams::SizeType::Small, Vec::new()));
                        }
                    }
                }
                if records.is_empty() {
                    return Ok(None);
                }
                records.sort_by_key(|(tag, _, _)| *tag);
                let mut out = Vec::new();
                for (tag, size_type, payload) in records {
                    $crate::streams::set::write_record(&mut out, tag, size_type, &payload)?;
                }
                Ok(Some(out))
            }

            fn twm(&mut self, diff: &[u8], base: &Self) -> $crate::error::Result<bool> {
                let mut conflict = false;
                let mut pos = 0;
                while pos < diff.len() {
                    let (tag, large, payload) = $crate::streams::set::read_record(
                        diff,
                        &mut pos,
                        stringify!($name),
                    )?;
                    match tag {
                        $(
                            $tag => {
                                conflict |= $crate::streams::Stream::twm(
                                    &mut self.$field,
                                    payload,
                                    &base.$field,
                                )?;
                            }
                        )*
                        _ => match Self::UNKNOWN_POLICY {
                            $crate::streams::set::UnknownPolicy::Strict => {
                                return Err($crate::error::Error::UnknownTag {
                                    tag,
                                    type_name: stringify!($name),
                                });
                            }
                            $crate::streams::set::UnknownPolicy::Skip => {
                                tracing::debug!(
                                    tag,
                                    type_name = stringify!($name),
                                    "skipping unknown tag in diff"
                                );
                            }
                            $crate::streams::set::UnknownPolicy::Preserve => {
                                if payload.is_empty() {
                                    self.unknown.remove(tag);
                                } else {
                                    self.unknown.insert(tag, large, payload.to_vec());
                                }
                            }
                        },
                    }
                }
                Ok(conflict)
            }
        }
    };
}

pub(crate) use stream_set;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::{IntStream, SkipSet, Stream, StringStream};

    stream_set! {
        struct Sample(Strict) {
            0 => count: IntStream [Small, "count"],
            1 => label: StringStream [Small, "label"],
        }
    }

    stream_set! {
        struct Lenient(Preserve) {
            0 => count: IntStream [Small, "count"],
        }
    }

    fn skip() -> SkipSet {
        SkipSet::new()
    }

    fn sample(count: u32, label: &str) -> Sample {
        let mut s = Sample::default();
        s.count.set(count);
        s.label.set(label.as_bytes().to_vec());
        s
    }

    #[test]
    fn test_freeze_ascending_tags_skips_empty() {
        let mut s = Sample::default();
        s.label.set(b"hi".to_vec());
        let frz = s.freeze(&skip()).unwrap();
        // only the label record is present
        assert_eq!(frz, [1, 0, 2, b'h', b'i']);
    }

    #[test]
    fn test_roundtrip() {
        let s = sample(5, "x");
        let frz = s.freeze(&skip()).unwrap();
        assert_eq!(Sample::thaw(&frz).unwrap(), s);
    }

    #[test]
    fn test_skipset_suppresses_field() {
        let s = sample(5, "x");
        let mut sk = SkipSet::new();
        sk.insert("label");
        let frz = s.freeze(&sk).unwrap();
        assert!(find_record(1, &frz, "Sample").unwrap().is_none());
        assert!(find_record(0, &frz, "Sample").unwrap().is_some());
    }

    #[test]
    fn test_strict_rejects_unknown_tag() {
        let mut frz = sample(5, "x").freeze(&skip()).unwrap();
        frz.extend_from_slice(&[9, 0, 1, 0xff]);
        assert!(matches!(
            Sample::thaw(&frz),
            Err(crate::error::Error::UnknownTag { tag: 9, .. })
        ));
    }

    #[test]
    fn test_preserve_keeps_unknown_records() {
        let mut one = Lenient::default();
        one.count.set(3);
        let mut frz = one.freeze(&skip()).unwrap();
        frz.extend_from_slice(&[9, 0, 1, 0xff]);
        let thawed = Lenient::thaw(&frz).unwrap();
        assert!(!thawed.unknown.is_empty());
        assert_eq!(thawed.freeze(&skip()).unwrap(), frz);
        // split freezes
        assert_eq!(
            thawed.freeze_ext(&skip(), false, true).unwrap(),
            [9, 0, 1, 0xff]
        );
        assert_eq!(
            thawed.freeze_ext(&skip(), true, false).unwrap(),
            one.freeze(&skip()).unwrap()
        );
    }

    #[test]
    fn test_diff_twm_identity() {
        let a = sample(1, "one");
        let b = sample(2, "two");
        let d = a.diff(&b).unwrap().unwrap();
        let mut merged = b.clone();
        assert!(!merged.twm(&d, &b).unwrap());
        assert_eq!(merged, a);
        assert!(a.diff(&a).unwrap().is_none());
    }

    #[test]
    fn test_diff_unsets_field() {
        let mut a = sample(1, "one");
        a.label = StringStream::default();
        let b = sample(1, "one");
        let d = a.diff(&b).unwrap().unwrap();
        let mut merged = b.clone();
        assert!(!merged.twm(&d, &b).unwrap());
        assert!(merged.label.is_empty());
    }

    #[test]
    fn test_preserved_unknowns_flow_through_diff() {
        let mut frz = Lenient::default().freeze(&skip()).unwrap();
        frz.extend_from_slice(&[9, 0, 1, 0xff]);
        let with_unknown = Lenient::thaw(&frz).unwrap();
        let plain = Lenient::default();
        let d = with_unknown.diff(&plain).unwrap().unwrap();
        let mut merged = plain.clone();
        assert!(!merged.twm(&d, &plain).unwrap());
        assert_eq!(merged, with_unknown);
        // and removal in the other direction
        let d = plain.diff(&with_unknown).unwrap().unwrap();
        let mut merged = with_unknown.clone();
        assert!(!merged.twm(&d, &with_unknown).unwrap());
        assert_eq!(merged, plain);
    }

    #[test]
    fn test_find_stream() {
        let s = sample(7, "seven");
        let frz = s.freeze(&skip()).unwrap();
        let count: IntStream = find_stream(0, &frz, "Sample").unwrap().unwrap();
        assert_eq!(count.value(), Some(7));
        assert!(find_stream::<IntStream>(3, &frz, "Sample").unwrap().is_none());
    }
}
