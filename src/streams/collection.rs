// src/streams/collection.rs

//! Typed collections of streams
//!
//! A collection holds children of one stream type under the item tag `1`.
//! [`StreamCollection`] keeps set semantics sorted by frozen payload;
//! [`OrderedStreamCollection`] preserves insertion order and uses the
//! dynamic size prefix so items can be large; [`AbsoluteStreamCollection`]
//! diffs by full replacement, for data that servers accrete over time
//! (signatures, most notably).

use crate::error::{Error, Result};
use crate::streams::{SizeType, SkipSet, Stream, read_dyn_size, take, write_size};

const ITEM_TAG: u8 = 1;

/// Unordered set of streams, frozen as `(tag:u8, len:u16, payload)` records
/// sorted by payload bytes. Duplicate payloads collapse.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StreamCollection<T: Stream> {
    // (frozen payload, item), kept sorted by payload
    items: Vec<(Vec<u8>, T)>,
}

impl<T: Stream> StreamCollection<T> {
    pub fn add(&mut self, item: T) -> Result<()> {
        let payload = item.freeze(&SkipSet::new())?;
        match self.items.binary_search_by(|(p, _)| p.cmp(&payload)) {
            Ok(_) => {} // already present
            Err(idx) => self.items.insert(idx, (payload, item)),
        }
        Ok(())
    }

    pub fn remove(&mut self, item: &T) -> Result<bool> {
        let payload = item.freeze(&SkipSet::new())?;
        match self.items.binary_search_by(|(p, _)| p.cmp(&payload)) {
            Ok(idx) => {
                self.items.remove(idx);
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    pub fn contains(&self, item: &T) -> Result<bool> {
        let payload = item.freeze(&SkipSet::new())?;
        Ok(self
            .items
            .binary_search_by(|(p, _)| p.cmp(&payload))
            .is_ok())
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter().map(|(_, item)| item)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    fn freeze_records(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for (payload, _) in &self.items {
            out.push(ITEM_TAG);
            write_size(&mut out, SizeType::Small, payload.len())?;
            out.extend_from_slice(payload);
        }
        Ok(out)
    }

    fn thaw_records(frz: &[u8]) -> Result<Self> {
        let mut new = Self::default();
        let mut pos = 0;
        while pos < frz.len() {
            let tag = *frz.get(pos).ok_or(Error::Truncated("StreamCollection"))?;
            pos += 1;
            if tag != ITEM_TAG {
                return Err(Error::UnknownTag {
                    tag,
                    type_name: "StreamCollection",
                });
            }
            let raw = take(frz, &mut pos, 2, "StreamCollection")?;
            let len = u16::from_be_bytes(raw.try_into().unwrap()) as usize;
            let payload = take(frz, &mut pos, len, "StreamCollection")?;
            new.add(T::thaw(payload)?)?;
        }
        Ok(new)
    }
}

impl<T: Stream> Stream for StreamCollection<T> {
    fn freeze(&self, _skip: &SkipSet) -> Result<Vec<u8>> {
        self.freeze_records()
    }

    fn thaw(frz: &[u8]) -> Result<Self> {
        Self::thaw_records(frz)
    }

    fn diff(&self, them: &Self) -> Result<Option<Vec<u8>>> {
        let ours: Vec<&Vec<u8>> = self.items.iter().map(|(p, _)| p).collect();
        let theirs: Vec<&Vec<u8>> = them.items.iter().map(|(p, _)| p).collect();
        let added: Vec<&Vec<u8>> = ours.iter().filter(|p| !theirs.contains(p)).copied().collect();
        let removed: Vec<&Vec<u8>> =
            theirs.iter().filter(|p| !ours.contains(p)).copied().collect();
        if added.is_empty() && removed.is_empty() {
            return Ok(None);
        }
        let mut out = Vec::new();
        out.extend_from_slice(&(removed.len() as u16).to_be_bytes());
        out.extend_from_slice(&(added.len() as u16).to_be_bytes());
        for payload in removed.into_iter().chain(added) {
            out.push(ITEM_TAG);
            write_size(&mut out, SizeType::Small, payload.len())?;
            out.extend_from_slice(payload);
        }
        Ok(Some(out))
    }

    fn twm(&mut self, diff: &[u8], base: &Self) -> Result<bool> {
        if self.items != base.items {
            return Ok(true);
        }
        if diff.len() < 4 {
            return Err(Error::Truncated("StreamCollection"));
        }
        let num_removed = u16::from_be_bytes(diff[..2].try_into().unwrap()) as usize;
        let num_added = u16::from_be_bytes(diff[2..4].try_into().unwrap()) as usize;
        let mut pos = 4;
        for idx in 0..num_removed + num_added {
            let tag = *diff.get(pos).ok_or(Error::Truncated("StreamCollection"))?;
            pos += 1;
            if tag != ITEM_TAG {
                return Err(Error::UnknownTag {
                    tag,
                    type_name: "StreamCollection",
                });
            }
            let raw = take(diff, &mut pos, 2, "StreamCollection")?;
            let len = u16::from_be_bytes(raw.try_into().unwrap()) as usize;
            let payload = take(diff, &mut pos, len, "StreamCollection")?;
            let item = T::thaw(payload)?;
            if idx < num_removed {
                self.remove(&item)?;
            } else {
                self.add(item)?;
            }
        }
        Ok(false)
    }
}

/// Collection preserving insertion order, with dynamic size prefixes so
/// items may exceed 64k
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OrderedStreamCollection<T: Stream> {
    items: Vec<T>,
}

impl<T: Stream> OrderedStreamCollection<T> {
    pub fn add(&mut self, item: T) {
        self.items.push(item);
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.items.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T: Stream> Stream for OrderedStreamCollection<T> {
    fn freeze(&self, skip: &SkipSet) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for item in &self.items {
            let payload = item.freeze(skip)?;
            out.push(ITEM_TAG);
            write_size(&mut out, SizeType::Dynamic, payload.len())?;
            out.extend_from_slice(&payload);
        }
        Ok(out)
    }

    fn thaw(frz: &[u8]) -> Result<Self> {
        let mut new = Self::default();
        let mut pos = 0;
        while pos < frz.len() {
            let tag = *frz
                .get(pos)
                .ok_or(Error::Truncated("OrderedStreamCollection"))?;
            pos += 1;
            if tag != ITEM_TAG {
                return Err(Error::UnknownTag {
                    tag,
                    type_name: "OrderedStreamCollection",
                });
            }
            let len = read_dyn_size(frz, &mut pos, "OrderedStreamCollection")?;
            let payload = take(frz, &mut pos, len, "OrderedStreamCollection")?;
            new.items.push(T::thaw(payload)?);
        }
        Ok(new)
    }

    fn diff(&self, them: &Self) -> Result<Option<Vec<u8>>> {
        if self.items == them.items {
            return Ok(None);
        }
        self.freeze(&SkipSet::new()).map(Some)
    }

    fn twm(&mut self, diff: &[u8], _base: &Self) -> Result<bool> {
        *self = Self::thaw(diff)?;
        Ok(false)
    }
}

/// Collection whose diff is always the full frozen form and whose merge is
/// replacement. Signature lists use this: the server may have accreted
/// signatures the client never saw, so relative diffs cannot be trusted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AbsoluteStreamCollection<T: Stream> {
    inner: StreamCollection<T>,
}

impl<T: Stream> AbsoluteStreamCollection<T> {
    pub fn add(&mut self, item: T) -> Result<()> {
        self.inner.add(item)
    }

    pub fn remove(&mut self, item: &T) -> Result<bool> {
        self.inner.remove(item)
    }

    pub fn contains(&self, item: &T) -> Result<bool> {
        self.inner.contains(item)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.inner.iter()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

impl<T: Stream> Stream for AbsoluteStreamCollection<T> {
    fn freeze(&self, skip: &SkipSet) -> Result<Vec<u8>> {
        self.inner.freeze(skip)
    }

    fn thaw(frz: &[u8]) -> Result<Self> {
        Ok(Self {
            inner: StreamCollection::thaw(frz)?,
        })
    }

    fn diff(&self, _them: &Self) -> Result<Option<Vec<u8>>> {
        // always absolute
        self.freeze(&SkipSet::new()).map(Some)
    }

    fn twm(&mut self, diff: &[u8], _base: &Self) -> Result<bool> {
        *self = Self::thaw(diff)?;
        Ok(false)
    }
}
