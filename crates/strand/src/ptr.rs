//! Shared pointers with identity-preserving serialization.
//!
//! A [`Ptr`] is the runtime's pointer model: a nullable, shared, mutable
//! handle. On the wire a pointer is a tag byte: `0x00` null, `0x01` inline
//! followed by the pointee, `0x02` back-reference followed by the offset at
//! which the pointee was first written. Deserialization allocates once per
//! offset, so two pointers equal-by-address before a round trip are
//! equal-by-address after it.

use std::any::{type_name, Any, TypeId};
use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

use crate::error::SerdeError;
use crate::serde::{Deserializer, Serializer};
use crate::types;

pub(crate) const TAG_NULL: u8 = 0x00;
pub(crate) const TAG_INLINE: u8 = 0x01;
pub(crate) const TAG_BACKREF: u8 = 0x02;

pub struct Ptr<T>(Option<Rc<RefCell<T>>>);

impl<T> Ptr<T> {
    pub fn null() -> Self {
        Ptr(None)
    }

    pub fn new(value: T) -> Self {
        Ptr(Some(Rc::new(RefCell::new(value))))
    }

    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    /// Borrows the pointee. Panics when null, like any pointer dereference.
    pub fn borrow(&self) -> Ref<'_, T> {
        self.0.as_ref().expect("dereference of a null Ptr").borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.0
            .as_ref()
            .expect("dereference of a null Ptr")
            .borrow_mut()
    }

    /// Address equality: both null, or both sharing one allocation.
    pub fn ptr_eq(&self, other: &Ptr<T>) -> bool {
        match (&self.0, &other.0) {
            (None, None) => true,
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub(crate) fn from_rc(rc: Rc<RefCell<T>>) -> Self {
        Ptr(Some(rc))
    }

    pub(crate) fn as_rc(&self) -> Option<&Rc<RefCell<T>>> {
        self.0.as_ref()
    }
}

impl<T> Clone for Ptr<T> {
    fn clone(&self) -> Self {
        Ptr(self.0.clone())
    }
}

impl<T> Default for Ptr<T> {
    fn default() -> Self {
        Ptr::null()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Ptr<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            None => f.write_str("Ptr(null)"),
            Some(rc) => write!(f, "Ptr({:?})", rc.borrow()),
        }
    }
}

/// Serializes a pointer at a monomorphic site: the pointee type is `T`, so
/// no type id is emitted.
pub fn serialize_ptr<T: Any>(s: &mut Serializer, p: &Ptr<T>) -> Result<(), SerdeError> {
    let rc = match p.as_rc() {
        None => {
            s.write_u8(TAG_NULL);
            return Ok(());
        }
        Some(rc) => rc,
    };
    let addr = Rc::as_ptr(rc) as usize;
    if let Some(&off) = s.regions.get(&addr) {
        s.write_u8(TAG_BACKREF);
        s.write_u64(off);
        return Ok(());
    }
    s.write_u8(TAG_INLINE);
    let off = s.position();
    s.regions.insert(addr, off);
    let entry = types::serde_of(TypeId::of::<T>()).ok_or(SerdeError::UnregisteredType {
        type_name: type_name::<T>(),
    })?;
    (entry.ser)(s, &*rc.borrow())
}

pub fn deserialize_ptr<T: Any + Default>(
    d: &mut Deserializer<'_>,
    out: &mut Ptr<T>,
) -> Result<(), SerdeError> {
    let tag_offset = d.consumed();
    match d.read_u8()? {
        TAG_NULL => {
            *out = Ptr::null();
            Ok(())
        }
        TAG_INLINE => {
            let off = d.position();
            let rc = Rc::new(RefCell::new(T::default()));
            d.regions.insert(off, Box::new(rc.clone()));
            let entry = types::serde_of(TypeId::of::<T>()).ok_or(SerdeError::UnregisteredType {
                type_name: type_name::<T>(),
            })?;
            (entry.de)(d, &mut *rc.borrow_mut())?;
            *out = Ptr::from_rc(rc);
            Ok(())
        }
        TAG_BACKREF => {
            let off = d.read_u64()?;
            let rc = d
                .regions
                .get(&off)
                .and_then(|a| a.downcast_ref::<Rc<RefCell<T>>>())
                .ok_or(SerdeError::BadBackReference(off))?
                .clone();
            *out = Ptr::from_rc(rc);
            Ok(())
        }
        tag => Err(SerdeError::InvalidPointerTag {
            tag,
            offset: tag_offset,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CallbackError;

    #[derive(Default, Debug)]
    struct Node {
        value: i64,
        next: Ptr<Node>,
    }

    fn node_ser(s: &mut Serializer, v: &Node) -> Result<(), CallbackError> {
        s.write_i64(v.value);
        serialize_ptr(s, &v.next)?;
        Ok(())
    }

    fn node_de(d: &mut Deserializer<'_>, v: &mut Node) -> Result<(), CallbackError> {
        v.value = d.read_i64()?;
        deserialize_ptr(d, &mut v.next)?;
        Ok(())
    }

    fn register_node() {
        types::register::<Node>(node_ser, node_de).unwrap();
    }

    #[test]
    fn shared_target_round_trips_to_shared_target() {
        register_node();
        let shared = Ptr::new(Node {
            value: 9,
            next: Ptr::null(),
        });
        let a = shared.clone();
        let b = shared.clone();

        let mut s = Serializer::new();
        serialize_ptr(&mut s, &a).unwrap();
        serialize_ptr(&mut s, &b).unwrap();
        let buf = s.into_inner();

        let mut d = Deserializer::new(&buf);
        let mut a2 = Ptr::<Node>::null();
        let mut b2 = Ptr::<Node>::null();
        deserialize_ptr(&mut d, &mut a2).unwrap();
        deserialize_ptr(&mut d, &mut b2).unwrap();

        assert!(a2.ptr_eq(&b2));
        a2.borrow_mut().value = 11;
        assert_eq!(b2.borrow().value, 11);
    }

    #[test]
    fn cyclic_graph_preserves_sharing() {
        register_node();
        let first = Ptr::new(Node {
            value: 1,
            next: Ptr::null(),
        });
        let second = Ptr::new(Node {
            value: 2,
            next: first.clone(),
        });
        first.borrow_mut().next = second.clone();

        let mut s = Serializer::new();
        serialize_ptr(&mut s, &first).unwrap();
        let buf = s.into_inner();

        let mut d = Deserializer::new(&buf);
        let mut first2 = Ptr::<Node>::null();
        deserialize_ptr(&mut d, &mut first2).unwrap();

        let second2 = first2.borrow().next.clone();
        assert_eq!(second2.borrow().value, 2);
        assert!(second2.borrow().next.ptr_eq(&first2));
    }

    #[test]
    fn null_pointer_round_trips() {
        register_node();
        let mut s = Serializer::new();
        serialize_ptr::<Node>(&mut s, &Ptr::null()).unwrap();
        let buf = s.into_inner();
        assert_eq!(buf, vec![TAG_NULL]);

        let mut d = Deserializer::new(&buf);
        let mut p = Ptr::<Node>::new(Node::default());
        deserialize_ptr(&mut d, &mut p).unwrap();
        assert!(p.is_null());
    }
}
