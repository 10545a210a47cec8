//! Process-wide type registry.
//!
//! Every type that can appear in a persisted frame (locals records,
//! pointees, slice elements, deferred callables) is attached to a pair of
//! codec callbacks here. Ids are assigned in registration order and are
//! immutable for the process lifetime: re-registering a type overwrites its
//! callbacks but never its id. Registration is meant for program startup;
//! it is not synchronized against in-flight serialization beyond the
//! registry lock, and registering new types after coroutine state has been
//! persisted shifts nothing only because existing ids never move.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;

use crate::error::{CallbackError, SerdeError};
use crate::serde::{Deserializer, Serializer};

/// Signature of custom serializer callbacks for `T`.
pub type SerializerFn<T> = fn(&mut Serializer, &T) -> Result<(), CallbackError>;

/// Signature of custom deserializer callbacks for `T`. The target slot is
/// pre-allocated (zero-valued) and written in place.
pub type DeserializerFn<T> = fn(&mut Deserializer<'_>, &mut T) -> Result<(), CallbackError>;

type ErasedSer = dyn Fn(&mut Serializer, &dyn Any) -> Result<(), SerdeError> + Send + Sync;
type ErasedDe = dyn Fn(&mut Deserializer<'_>, &mut dyn Any) -> Result<(), SerdeError> + Send + Sync;
type MakeFn = fn() -> Box<dyn Any>;

#[derive(Clone)]
pub(crate) struct SerdeEntry {
    pub id: u64,
    pub ser: Arc<ErasedSer>,
    pub de: Arc<ErasedDe>,
    pub make: MakeFn,
}

struct TypeMap {
    custom: Vec<TypeId>,
    serdes: HashMap<TypeId, SerdeEntry>,
}

impl TypeMap {
    fn new() -> Self {
        let mut m = TypeMap {
            custom: Vec::new(),
            serdes: HashMap::new(),
        };
        m.seed_basic_types();
        m
    }

    fn attach(
        &mut self,
        t: TypeId,
        type_name: &'static str,
        make: MakeFn,
        ser: Option<Arc<ErasedSer>>,
        de: Option<Arc<ErasedDe>>,
    ) -> Result<(), SerdeError> {
        let (ser, de) = match (ser, de) {
            (Some(s), Some(d)) => (s, d),
            _ => return Err(SerdeError::MissingCallback { type_name }),
        };
        let id = match self.serdes.get(&t) {
            Some(existing) => existing.id,
            None => {
                self.custom.push(t);
                (self.custom.len() - 1) as u64
            }
        };
        self.serdes.insert(t, SerdeEntry { id, ser, de, make });
        Ok(())
    }

    fn seed_basic_types(&mut self) {
        fn seed<T: Any + Default>(
            m: &mut TypeMap,
            ser: SerializerFn<T>,
            de: DeserializerFn<T>,
        ) {
            let (s, d) = erase::<T>(ser, de);
            // Seeding uses fresh ids and complete callback pairs; attach
            // cannot fail here.
            let _ = m.attach(TypeId::of::<T>(), type_name::<T>(), make_default::<T>, Some(s), Some(d));
        }

        seed::<i64>(self, |s, v| Ok(s.write_i64(*v)), |d, v| Ok(*v = d.read_i64()?));
        seed::<i32>(self, |s, v| Ok(s.write_i32(*v)), |d, v| Ok(*v = d.read_i32()?));
        seed::<u64>(self, |s, v| Ok(s.write_u64(*v)), |d, v| Ok(*v = d.read_u64()?));
        seed::<f64>(self, |s, v| Ok(s.write_f64(*v)), |d, v| Ok(*v = d.read_f64()?));
        seed::<bool>(self, |s, v| Ok(s.write_bool(*v)), |d, v| Ok(*v = d.read_bool()?));
        seed::<String>(self, |s, v| Ok(s.write_str(v)), |d, v| Ok(*v = d.read_str()?));
        seed::<()>(self, |_, _| Ok(()), |_, _| Ok(()));
    }
}

fn make_default<T: Any + Default>() -> Box<dyn Any> {
    Box::new(T::default())
}

fn erase<T: Any>(
    ser: SerializerFn<T>,
    de: DeserializerFn<T>,
) -> (Arc<ErasedSer>, Arc<ErasedDe>) {
    let name = type_name::<T>();
    let erased_ser: Arc<ErasedSer> = Arc::new(move |s, v| {
        let v = v
            .downcast_ref::<T>()
            .unwrap_or_else(|| panic!("registry dispatched {name} serializer to a foreign value"));
        ser(s, v).map_err(|source| SerdeError::SerializeCallback {
            type_name: name,
            source,
        })
    });
    let erased_de: Arc<ErasedDe> = Arc::new(move |d, v| {
        let v = v
            .downcast_mut::<T>()
            .unwrap_or_else(|| panic!("registry dispatched {name} deserializer to a foreign slot"));
        de(d, v).map_err(|source| SerdeError::DeserializeCallback {
            type_name: name,
            source,
        })
    });
    (erased_ser, erased_de)
}

static TYPES: Lazy<Mutex<TypeMap>> = Lazy::new(|| Mutex::new(TypeMap::new()));

fn with_types<T>(f: impl FnOnce(&mut TypeMap) -> T) -> T {
    let mut m = TYPES.lock().expect("type registry poisoned");
    f(&mut m)
}

/// Attaches custom serialization and deserialization callbacks to `T`.
///
/// Coroutine state is serialized and deserialized when calling
/// [`Context::marshal_append`](crate::Context::marshal_append) and
/// [`Context::unmarshal`](crate::Context::unmarshal). Pointers to the same
/// address are detected as such and reconstructed pointing to the same
/// value; slices sharing a backing array are deserialized into one array
/// with shared storage, elements between length and capacity included.
pub fn register<T: Any + Default>(
    ser: SerializerFn<T>,
    de: DeserializerFn<T>,
) -> Result<(), SerdeError> {
    register_with::<T>(Some(ser), Some(de))
}

/// Lower-level registration accepting possibly-absent callbacks; fails with
/// [`SerdeError::MissingCallback`] when either is `None`.
pub fn register_with<T: Any + Default>(
    ser: Option<SerializerFn<T>>,
    de: Option<DeserializerFn<T>>,
) -> Result<(), SerdeError> {
    let (ser, de) = match (ser, de) {
        (Some(s), Some(d)) => {
            let (s, d) = erase::<T>(s, d);
            (Some(s), Some(d))
        }
        _ => (None, None),
    };
    with_types(|m| m.attach(TypeId::of::<T>(), type_name::<T>(), make_default::<T>, ser, de))
}

/// Looks up the id and codecs attached to `T`, if any.
pub fn serde_of_type<T: Any>() -> Option<u64> {
    with_types(|m| m.serdes.get(&TypeId::of::<T>()).map(|e| e.id))
}

pub(crate) fn serde_of(t: TypeId) -> Option<SerdeEntry> {
    with_types(|m| m.serdes.get(&t).cloned())
}

pub(crate) fn serde_by_id(id: u64) -> Option<SerdeEntry> {
    with_types(|m| {
        let t = m.custom.get(id as usize)?;
        m.serdes.get(t).cloned()
    })
}

/// Serializes a value whose static type is known at the write site. No type
/// id is emitted; the reader is expected to name the same type.
pub fn serialize<T: Any>(s: &mut Serializer, v: &T) -> Result<(), SerdeError> {
    let entry = serde_of(TypeId::of::<T>()).ok_or(SerdeError::UnregisteredType {
        type_name: type_name::<T>(),
    })?;
    (entry.ser)(s, v)
}

/// Deserializes into a slot whose static type is known at the read site.
pub fn deserialize_into<T: Any>(d: &mut Deserializer<'_>, v: &mut T) -> Result<(), SerdeError> {
    let entry = serde_of(TypeId::of::<T>()).ok_or(SerdeError::UnregisteredType {
        type_name: type_name::<T>(),
    })?;
    (entry.de)(d, v)
}

/// Serializes a value behind a polymorphic root: the registry id is written
/// as a varint prefix so the reader can look the type up by id.
pub fn serialize_polymorphic(s: &mut Serializer, v: &dyn Any) -> Result<(), SerdeError> {
    let entry = serde_of(v.type_id()).ok_or(SerdeError::UnregisteredType {
        type_name: "<unregistered dynamic value>",
    })?;
    s.write_uvarint(entry.id);
    (entry.ser)(s, v)
}

/// Counterpart of [`serialize_polymorphic`]: reads the id prefix, allocates
/// a zero value of that type, and fills it in.
pub fn deserialize_polymorphic(d: &mut Deserializer<'_>) -> Result<Box<dyn Any>, SerdeError> {
    let id = d.read_uvarint()?;
    let entry = serde_by_id(id).ok_or(SerdeError::UnknownTypeId(id))?;
    let mut v = (entry.make)();
    (entry.de)(d, &mut *v)?;
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, PartialEq, Debug)]
    struct Pair {
        a: i64,
        b: i64,
    }

    fn pair_ser(s: &mut Serializer, v: &Pair) -> Result<(), CallbackError> {
        s.write_i64(v.a);
        s.write_i64(v.b);
        Ok(())
    }

    fn pair_de(d: &mut Deserializer<'_>, v: &mut Pair) -> Result<(), CallbackError> {
        v.a = d.read_i64()?;
        v.b = d.read_i64()?;
        Ok(())
    }

    #[test]
    fn id_is_stable_across_re_registration() {
        register::<Pair>(pair_ser, pair_de).unwrap();
        let id = serde_of_type::<Pair>().unwrap();
        register::<Pair>(pair_ser, pair_de).unwrap();
        assert_eq!(serde_of_type::<Pair>().unwrap(), id);
    }

    #[test]
    fn missing_callback_is_rejected() {
        match register_with::<Pair>(Some(pair_ser), None) {
            Err(SerdeError::MissingCallback { .. }) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn polymorphic_round_trip() {
        register::<Pair>(pair_ser, pair_de).unwrap();
        let mut s = Serializer::new();
        serialize_polymorphic(&mut s, &Pair { a: 1, b: -2 }).unwrap();
        let buf = s.into_inner();

        let mut d = Deserializer::new(&buf);
        let v = deserialize_polymorphic(&mut d).unwrap();
        assert_eq!(v.downcast_ref::<Pair>(), Some(&Pair { a: 1, b: -2 }));
    }

    #[test]
    fn basic_types_are_pre_registered() {
        let mut s = Serializer::new();
        serialize(&mut s, &7i64).unwrap();
        serialize(&mut s, &String::from("x")).unwrap();
        let buf = s.into_inner();

        let mut d = Deserializer::new(&buf);
        let mut n = 0i64;
        deserialize_into(&mut d, &mut n).unwrap();
        assert_eq!(n, 7);
        let mut t = String::new();
        deserialize_into(&mut d, &mut t).unwrap();
        assert_eq!(t, "x");
    }
}
