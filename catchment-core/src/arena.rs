//! Typed pools handing out handles into contiguous storage.

use crate::errors::{CatchmentError, CatchmentResult};
use crate::handles::Handle;
use std::collections::HashMap;
use std::marker::PhantomData;

/// A contiguous pool of named entities addressed by a typed handle.
///
/// Entities are never removed, so a handle stays valid for the life of the pool.
#[derive(Debug, Clone)]
pub struct Pool<H: Handle, T> {
    items: Vec<T>,
    names: Vec<String>,
    by_name: HashMap<String, H>,
    _handle: PhantomData<H>,
}

impl<H: Handle, T> Default for Pool<H, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Handle, T> Pool<H, T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            names: Vec::new(),
            by_name: HashMap::new(),
            _handle: PhantomData,
        }
    }

    /// Register a new entity, failing if the name is already taken.
    pub fn add(&mut self, name: &str, item: T) -> CatchmentResult<H> {
        if self.by_name.contains_key(name) {
            return Err(CatchmentError::DuplicateName {
                kind: H::KIND,
                name: name.to_string(),
            });
        }
        let handle = H::from_position(self.items.len());
        self.items.push(item);
        self.names.push(name.to_string());
        self.by_name.insert(name.to_string(), handle);
        Ok(handle)
    }

    pub fn get(&self, handle: H) -> CatchmentResult<&T> {
        self.items
            .get(handle.position())
            .ok_or_else(|| Self::unknown(handle))
    }

    pub fn get_mut(&mut self, handle: H) -> CatchmentResult<&mut T> {
        self.items
            .get_mut(handle.position())
            .ok_or_else(|| Self::unknown(handle))
    }

    /// Checks that the handle was issued by this pool.
    pub fn check(&self, handle: H) -> CatchmentResult<()> {
        self.get(handle).map(|_| ())
    }

    pub fn find(&self, name: &str) -> CatchmentResult<H> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| CatchmentError::UnknownName {
                kind: H::KIND,
                name: name.to_string(),
            })
    }

    /// Name of the entity. Unknown handles render as their number.
    pub fn name(&self, handle: H) -> &str {
        self.names
            .get(handle.position())
            .map(String::as_str)
            .unwrap_or("<unknown>")
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn handles(&self) -> impl Iterator<Item = H> {
        (0..self.items.len()).map(H::from_position)
    }

    pub fn iter(&self) -> impl Iterator<Item = (H, &T)> {
        self.items
            .iter()
            .enumerate()
            .map(|(i, item)| (H::from_position(i), item))
    }

    /// Transform every entity, keeping handles and names.
    pub fn map<U>(self, mut f: impl FnMut(H, T) -> U) -> Pool<H, U> {
        let items = self
            .items
            .into_iter()
            .enumerate()
            .map(|(i, item)| f(H::from_position(i), item))
            .collect();
        Pool {
            items,
            names: self.names,
            by_name: self.by_name,
            _handle: PhantomData,
        }
    }

    fn unknown(handle: H) -> CatchmentError {
        CatchmentError::UnknownHandle {
            kind: H::KIND,
            handle: handle.position() as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handles::EquationH;

    #[test]
    fn handles_are_sequential_and_names_unique() {
        let mut pool: Pool<EquationH, u8> = Pool::new();
        let a = pool.add("a", 1).unwrap();
        let b = pool.add("b", 2).unwrap();
        assert_eq!(a, EquationH(0));
        assert_eq!(b, EquationH(1));
        assert_eq!(*pool.get(b).unwrap(), 2);
        assert_eq!(pool.find("a").unwrap(), a);
        assert_eq!(pool.name(b), "b");

        let err = pool.add("a", 3).unwrap_err();
        assert!(matches!(err, CatchmentError::DuplicateName { .. }));
        assert!(matches!(
            pool.get(EquationH(7)),
            Err(CatchmentError::UnknownHandle { handle: 7, .. })
        ));

        let doubled = pool.map(|_, v| u32::from(v) * 2);
        assert_eq!(*doubled.get(b).unwrap(), 4);
        assert_eq!(doubled.find("b").unwrap(), b);
    }
}
