//! Sequences with shared backing storage.
//!
//! A [`Slice`] is a view `(backing array, offset, length)` over a shared,
//! growable backing store, mirroring how the compiled language's sequences
//! alias one another. Capacity is the distance from the view's offset to
//! the end of the backing array. Serialization writes the backing array
//! once (with pointer identity, tail elements included) and each view as a
//! reference plus its offset, length, and capacity, so two slices sharing a
//! backing array before a round trip share one after it.

use std::any::{type_name, Any, TypeId};
use std::cell::RefCell;
use std::rc::Rc;

use crate::error::SerdeError;
use crate::ptr::{TAG_BACKREF, TAG_INLINE, TAG_NULL};
use crate::serde::{Deserializer, Serializer};
use crate::types;

pub struct Slice<T> {
    data: Option<Rc<RefCell<Vec<T>>>>,
    off: usize,
    len: usize,
}

impl<T> Slice<T> {
    /// The nil slice: no backing array, zero length and capacity.
    pub fn null() -> Self {
        Slice {
            data: None,
            off: 0,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn cap(&self) -> usize {
        match &self.data {
            None => 0,
            Some(rc) => rc.borrow().len() - self.off,
        }
    }

    /// True when both views are backed by the same allocation.
    pub fn shares_backing(&self, other: &Slice<T>) -> bool {
        match (&self.data, &other.data) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Sub-slice `self[lo..hi]`, sharing the backing array.
    pub fn sub(&self, lo: usize, hi: usize) -> Slice<T> {
        assert!(lo <= hi && hi <= self.cap(), "slice bounds out of range");
        Slice {
            data: self.data.clone(),
            off: self.off + lo,
            len: hi - lo,
        }
    }

    fn backing(&self) -> &Rc<RefCell<Vec<T>>> {
        self.data.as_ref().expect("index into a nil slice")
    }
}

impl<T: Clone> Slice<T> {
    pub fn from_vec(v: Vec<T>) -> Self {
        let len = v.len();
        Slice {
            data: Some(Rc::new(RefCell::new(v))),
            off: 0,
            len,
        }
    }

    pub fn get(&self, i: usize) -> T {
        assert!(i < self.len, "slice index out of range");
        self.backing().borrow()[self.off + i].clone()
    }

    pub fn set(&self, i: usize, v: T) {
        assert!(i < self.len, "slice index out of range");
        self.backing().borrow_mut()[self.off + i] = v;
    }

    pub fn to_vec(&self) -> Vec<T> {
        let backing = self.backing().borrow();
        backing[self.off..self.off + self.len].to_vec()
    }

    /// Appends one element, returning the extended view. Writes in place
    /// while capacity remains (visible through every aliasing view), and
    /// reallocates into a fresh backing array otherwise.
    pub fn append(&self, v: T) -> Slice<T> {
        if self.len < self.cap() {
            self.backing().borrow_mut()[self.off + self.len] = v;
            return Slice {
                data: self.data.clone(),
                off: self.off,
                len: self.len + 1,
            };
        }
        let mut grown: Vec<T> = match &self.data {
            None => Vec::with_capacity(1),
            Some(rc) => {
                let backing = rc.borrow();
                backing[self.off..self.off + self.len].to_vec()
            }
        };
        grown.push(v);
        Slice::from_vec(grown)
    }
}

impl<T: Clone + Default> Slice<T> {
    /// `make([]T, len, cap)`: a zeroed backing array of `cap` elements with
    /// the first `len` visible.
    pub fn make(len: usize, cap: usize) -> Self {
        assert!(len <= cap, "make: len exceeds cap");
        Slice {
            data: Some(Rc::new(RefCell::new(vec![T::default(); cap]))),
            off: 0,
            len,
        }
    }
}

impl<T> Clone for Slice<T> {
    fn clone(&self) -> Self {
        Slice {
            data: self.data.clone(),
            off: self.off,
            len: self.len,
        }
    }
}

impl<T> Default for Slice<T> {
    fn default() -> Self {
        Slice::null()
    }
}

pub fn serialize_slice<T: Any>(s: &mut Serializer, sl: &Slice<T>) -> Result<(), SerdeError> {
    match &sl.data {
        None => s.write_u8(TAG_NULL),
        Some(rc) => {
            let addr = Rc::as_ptr(rc) as usize;
            if let Some(&off) = s.regions.get(&addr) {
                s.write_u8(TAG_BACKREF);
                s.write_u64(off);
            } else {
                s.write_u8(TAG_INLINE);
                let written_at = s.position();
                s.regions.insert(addr, written_at);
                let entry =
                    types::serde_of(TypeId::of::<T>()).ok_or(SerdeError::UnregisteredType {
                        type_name: type_name::<T>(),
                    })?;
                let backing = rc.borrow();
                s.write_u64(backing.len() as u64);
                for elem in backing.iter() {
                    (entry.ser)(s, elem)?;
                }
            }
        }
    }
    s.write_u64(sl.off as u64);
    s.write_u64(sl.len as u64);
    s.write_u64(sl.cap() as u64);
    Ok(())
}

pub fn deserialize_slice<T: Any + Default>(
    d: &mut Deserializer<'_>,
    out: &mut Slice<T>,
) -> Result<(), SerdeError> {
    let tag_offset = d.consumed();
    let data = match d.read_u8()? {
        TAG_NULL => None,
        TAG_INLINE => {
            let written_at = d.position();
            let count = d.read_u64()? as usize;
            let mut backing = Vec::with_capacity(count);
            backing.resize_with(count, T::default);
            let rc = Rc::new(RefCell::new(backing));
            d.regions.insert(written_at, Box::new(rc.clone()));
            let entry = types::serde_of(TypeId::of::<T>()).ok_or(SerdeError::UnregisteredType {
                type_name: type_name::<T>(),
            })?;
            for i in 0..count {
                let mut slot = T::default();
                (entry.de)(d, &mut slot)?;
                rc.borrow_mut()[i] = slot;
            }
            Some(rc)
        }
        TAG_BACKREF => {
            let off = d.read_u64()?;
            Some(
                d.regions
                    .get(&off)
                    .and_then(|a| a.downcast_ref::<Rc<RefCell<Vec<T>>>>())
                    .ok_or(SerdeError::BadBackReference(off))?
                    .clone(),
            )
        }
        tag => {
            return Err(SerdeError::InvalidPointerTag {
                tag,
                offset: tag_offset,
            })
        }
    };
    let off = d.read_u64()?;
    let len = d.read_u64()?;
    let cap = d.read_u64()?;
    let backing_len = data.as_ref().map_or(0, |rc| rc.borrow().len());
    if len > cap || (off + cap) != backing_len as u64 {
        return Err(SerdeError::InvalidSequenceHeader {
            off,
            len,
            cap,
            backing: backing_len,
        });
    }
    *out = Slice {
        data,
        off: off as usize,
        len: len as usize,
    };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn views_share_in_place_growth() {
        let s = Slice::<i64>::make(3, 5);
        s.set(0, 1);
        s.set(1, 2);
        s.set(2, 3);
        let grown = s.append(4);
        assert_eq!(grown.len(), 4);
        assert_eq!(grown.get(3), 4);
        assert!(grown.shares_backing(&s));

        let tail = s.sub(1, 3);
        tail.set(0, 20);
        assert_eq!(s.get(1), 20);
    }

    #[test]
    fn full_append_reallocates() {
        let s = Slice::<i64>::from_vec(vec![1, 2]);
        let grown = s.append(3);
        assert!(!grown.shares_backing(&s));
        assert_eq!(grown.to_vec(), vec![1, 2, 3]);
        assert_eq!(s.to_vec(), vec![1, 2]);
    }

    #[test]
    fn shared_backing_round_trips_shared() {
        let s = Slice::<i64>::make(5, 5);
        for i in 0..5 {
            s.set(i, (i + 1) as i64);
        }
        let a = s.sub(0, 3);
        let b = s.sub(1, 4);

        let mut ser = Serializer::new();
        serialize_slice(&mut ser, &a).unwrap();
        serialize_slice(&mut ser, &b).unwrap();
        let buf = ser.into_inner();

        let mut d = Deserializer::new(&buf);
        let mut a2 = Slice::<i64>::null();
        let mut b2 = Slice::<i64>::null();
        deserialize_slice(&mut d, &mut a2).unwrap();
        deserialize_slice(&mut d, &mut b2).unwrap();

        assert!(a2.shares_backing(&b2));
        assert_eq!(a2.len(), 3);
        assert_eq!(a2.cap(), 5);
        assert_eq!(b2.len(), 3);
        assert_eq!(b2.cap(), 4);

        // a2[1] and b2[0] alias one element of the shared backing array.
        a2.set(1, 42);
        assert_eq!(b2.get(0), 42);

        // The [len, cap) tail survived the round trip.
        assert_eq!(a2.sub(0, 5).get(4), 5);
    }

    #[test]
    fn nil_slice_round_trips() {
        let mut ser = Serializer::new();
        serialize_slice::<i64>(&mut ser, &Slice::null()).unwrap();
        let buf = ser.into_inner();

        let mut d = Deserializer::new(&buf);
        let mut out = Slice::<i64>::from_vec(vec![1]);
        deserialize_slice(&mut d, &mut out).unwrap();
        assert_eq!(out.len(), 0);
        assert_eq!(out.cap(), 0);
    }
}
