//! Variable store: name-hash -> named-variable map, with array descriptors
//! and lazy element allocation (spec §4.6).

use std::collections::HashMap;

use crate::errors::{Error, ErrorKind};
use crate::memory::{BlockId, MemoryManager};
use crate::types::{TypeTag, Value};

/// Whether `VariableStore::create` found an existing entry or made a new
/// one; drives the `OPTION EXPLICIT` check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExisted,
}

#[derive(Debug, Clone)]
pub struct ArrayDescriptor {
    /// `(lbound, ubound)` per dimension, outer-to-inner.
    pub bounds: Vec<(i32, i32)>,
    pub element_type: TypeTag,
    /// Materialized lazily on first write; `None` means every element
    /// still reads as the type's zero value (or empty string).
    pub data: Option<BlockId>,
}

impl ArrayDescriptor {
    pub fn element_count(&self) -> usize {
        self.bounds
            .iter()
            .map(|(lo, hi)| (hi - lo + 1).max(0) as usize)
            .product()
    }

    fn element_size(&self) -> usize {
        match self.element_type {
            TypeTag::U8 => 1,
            TypeTag::U16 | TypeTag::I16 => 2,
            TypeTag::I32 | TypeTag::F32 => 4,
            TypeTag::F64 => 8,
            TypeTag::Str => 8, // an out-of-line BlockId slot, resolved indirectly
        }
    }

    /// Computes `Σ (s_i - lbound_i) * stride_i`, range-checking every
    /// subscript against its stored bounds.
    pub fn linear_offset(&self, subscripts: &[i32]) -> Result<usize, Error> {
        if subscripts.len() != self.bounds.len() {
            return Err(ErrorKind::WrongSubscriptCount.into());
        }
        let mut offset = 0usize;
        let mut stride = 1usize;
        for (i, &(lo, hi)) in self.bounds.iter().enumerate().rev() {
            let s = subscripts[i];
            if s < lo || s > hi {
                return Err(ErrorKind::SubscriptRange.into());
            }
            offset += (s - lo) as usize * stride;
            stride *= (hi - lo + 1) as usize;
        }
        Ok(offset)
    }

    /// Allocates the backing block on first write, zero/empty-initialized.
    /// String elements need an explicit pass after allocation: a zeroed
    /// slot reads back as block index 0, a real (if coincidental) block
    /// reference rather than the invalid-descriptor sentinel.
    pub fn ensure_allocated(&mut self, mm: &mut MemoryManager) -> Result<BlockId, Error> {
        if let Some(id) = self.data {
            return Ok(id);
        }
        let size = self.element_count() * self.element_size();
        let id = mm.alloc(size)?;
        if self.element_type == TypeTag::Str {
            for i in 0..self.element_count() {
                mm.write_block_ref(id, i * 8, None)?;
            }
        }
        self.data = Some(id);
        Ok(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentFlags {
    pub busy: bool,
    pub is_function: bool,
    pub arg_count: u8,
    pub builtin: bool,
}

#[derive(Debug, Clone)]
pub enum VarSlot {
    Scalar(Value),
    Array(ArrayDescriptor),
}

#[derive(Debug, Clone)]
pub struct NamedVariable {
    pub hash: u32,
    pub flags: IdentFlags,
    pub slot: VarSlot,
    #[cfg(debug_assertions)]
    pub name: String,
}

#[derive(Default)]
pub struct VariableStore {
    vars: HashMap<u32, NamedVariable>,
}

impl VariableStore {
    pub fn new() -> Self {
        VariableStore::default()
    }

    /// Returns the existing entry for `hash`, or creates a scalar `Null`
    /// placeholder and returns `Created`. Rolls back on allocation failure
    /// so no half-initialized entry is left behind (spec §7,
    /// "Fatal-at-reset").
    pub fn create_scalar(
        &mut self,
        hash: u32,
        _name: &str,
    ) -> (&mut NamedVariable, CreateOutcome) {
        let outcome = if self.vars.contains_key(&hash) {
            CreateOutcome::AlreadyExisted
        } else {
            self.vars.insert(
                hash,
                NamedVariable {
                    hash,
                    flags: IdentFlags {
                        busy: true,
                        is_function: false,
                        arg_count: 0,
                        builtin: false,
                    },
                    slot: VarSlot::Scalar(Value::Null),
                    #[cfg(debug_assertions)]
                    name: _name.to_string(),
                },
            );
            CreateOutcome::Created
        };
        (self.vars.get_mut(&hash).unwrap(), outcome)
    }

    pub fn create_array(
        &mut self,
        hash: u32,
        _name: &str,
        bounds: Vec<(i32, i32)>,
        element_type: TypeTag,
    ) -> Result<CreateOutcome, Error> {
        if self.vars.contains_key(&hash) {
            return Ok(CreateOutcome::AlreadyExisted);
        }
        self.vars.insert(
            hash,
            NamedVariable {
                hash,
                flags: IdentFlags {
                    busy: true,
                    is_function: false,
                    arg_count: bounds.len() as u8,
                    builtin: false,
                },
                slot: VarSlot::Array(ArrayDescriptor {
                    bounds,
                    element_type,
                    data: None,
                }),
                #[cfg(debug_assertions)]
                name: _name.to_string(),
            },
        );
        Ok(CreateOutcome::Created)
    }

    pub fn get(&self, hash: u32) -> Option<&NamedVariable> {
        self.vars.get(&hash).filter(|v| v.flags.busy)
    }

    pub fn get_mut(&mut self, hash: u32) -> Option<&mut NamedVariable> {
        self.vars.get_mut(&hash).filter(|v| v.flags.busy)
    }

    /// Releases a variable's memory: frees an owned scalar string, or walks
    /// an array's elements freeing any string elements before freeing the
    /// data block itself (spec §4.5, ERASE).
    pub fn erase(&mut self, hash: u32, mm: &mut MemoryManager) -> Result<(), Error> {
        let Some(var) = self.vars.get_mut(&hash) else {
            return Err(ErrorKind::UnknownIdentifier.into());
        };
        match &var.slot {
            VarSlot::Scalar(Value::Str(s)) if s.owned => {
                if let crate::types::StringPayload::Block(id) = s.payload {
                    mm.free(id)?;
                }
            }
            VarSlot::Array(arr) => {
                if let Some(data_id) = arr.data {
                    if arr.element_type == TypeTag::Str {
                        for i in 0..arr.element_count() {
                            if let Some(string_block) = mm.read_block_ref(data_id, i * 8)? {
                                mm.free(string_block)?;
                            }
                        }
                    }
                    mm.free(data_id)?;
                }
            }
            _ => {}
        }
        var.flags.busy = false;
        Ok(())
    }

    pub fn set_scalar(&mut self, hash: u32, value: Value, mm: &mut MemoryManager) -> Result<(), Error> {
        let var = self.vars.get_mut(&hash).ok_or(ErrorKind::UnknownIdentifier)?;
        if let VarSlot::Scalar(old) = &var.slot {
            if let Value::Str(s) = old {
                if s.owned {
                    if let crate::types::StringPayload::Block(id) = s.payload {
                        mm.free(id)?;
                    }
                }
            }
        }
        var.slot = VarSlot::Scalar(value);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &NamedVariable> {
        self.vars.values().filter(|v| v.flags.busy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_scalar_twice_reports_existed() {
        let mut store = VariableStore::new();
        let (_, first) = store.create_scalar(1000, "A");
        assert_eq!(first, CreateOutcome::Created);
        let (_, second) = store.create_scalar(1000, "A");
        assert_eq!(second, CreateOutcome::AlreadyExisted);
    }

    #[test]
    fn array_linear_offset_checks_bounds() {
        let arr = ArrayDescriptor {
            bounds: vec![(0, 2), (0, 2)],
            element_type: TypeTag::I32,
            data: None,
        };
        assert_eq!(arr.linear_offset(&[1, 1]).unwrap(), 4);
        assert!(arr.linear_offset(&[3, 0]).is_err());
        assert!(arr.linear_offset(&[0]).is_err());
    }

    #[test]
    fn erase_frees_array_data_block() {
        let mut store = VariableStore::new();
        let mut mm = MemoryManager::new();
        store
            .create_array(2000, "ARR", vec![(0, 3)], TypeTag::I32)
            .unwrap();
        if let VarSlot::Array(arr) = &mut store.get_mut(2000).unwrap().slot {
            arr.ensure_allocated(&mut mm).unwrap();
        }
        store.erase(2000, &mut mm).unwrap();
        assert!(store.get(2000).is_none());
    }

    #[test]
    fn fresh_string_array_elements_read_as_invalid_not_block_zero() {
        let mut mm = MemoryManager::new();
        // Occupy block index 0 with something else first, so a zeroed slot
        // that was misread as a real block index would alias it.
        let _decoy = mm.store_string(b"decoy").unwrap();

        let mut arr = ArrayDescriptor {
            bounds: vec![(0, 2)],
            element_type: TypeTag::Str,
            data: None,
        };
        let id = arr.ensure_allocated(&mut mm).unwrap();
        for i in 0..arr.element_count() {
            assert_eq!(mm.read_block_ref(id, i * 8).unwrap(), None);
        }
    }

    #[test]
    fn erase_frees_string_array_elements() {
        let mut store = VariableStore::new();
        let mut mm = MemoryManager::new();
        store
            .create_array(3000, "S", vec![(0, 1)], TypeTag::Str)
            .unwrap();
        let data_id = if let VarSlot::Array(arr) = &mut store.get_mut(3000).unwrap().slot {
            let id = arr.ensure_allocated(&mut mm).unwrap();
            let text_block = mm.store_string(b"hi").unwrap();
            mm.write_block_ref(id, 0, Some(text_block)).unwrap();
            id
        } else {
            unreachable!()
        };
        store.erase(3000, &mut mm).unwrap();
        assert!(mm.read(data_id).is_err());
    }
}
