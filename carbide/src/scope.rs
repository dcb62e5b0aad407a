// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::fmt::Display;

use crate::{Initializer, Name, Type};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub u32);

pub const GLOBAL_SCOPE: ScopeId = ScopeId(0);

impl ScopeId {
    #[must_use]
    pub const fn is_global(self) -> bool {
        self.0 == GLOBAL_SCOPE.0
    }
}

impl Display for ScopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scope{}", self.0)
    }
}

/// Storage-class bitset of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Storage(u16);

impl Storage {
    pub const NONE: Self = Self(0);
    pub const EXTERN: Self = Self(1 << 0);
    pub const STATIC: Self = Self(1 << 1);
    pub const INLINE: Self = Self(1 << 2);
    pub const ENUM_MEMBER: Self = Self(1 << 3);
    pub const PARAM: Self = Self(1 << 4);
    pub const REF_TAKEN: Self = Self(1 << 5);

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[must_use]
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

/// Index of a function definition in the translation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncId(pub u32);

#[derive(Debug, Clone)]
pub struct VarInfo {
    pub name: Name,
    pub ty: Type,
    pub storage: Storage,
    /// Value slot for enum members.
    pub enum_value: i64,
    /// For a function-local static: the name of its synthesized global twin.
    pub static_gvar: Option<Name>,
    /// For a global holding a function definition.
    pub func: Option<FuncId>,
    /// For a global: its initializer, if any.
    pub init: Option<Initializer>,
}

impl VarInfo {
    #[must_use]
    pub fn new(name: Name, ty: Type, storage: Storage) -> Self {
        Self {
            name,
            ty,
            storage,
            enum_value: 0,
            static_gvar: None,
            func: None,
            init: None,
        }
    }
}

#[derive(Debug)]
pub struct Scope {
    pub parent: Option<ScopeId>,
    pub vars: Vec<VarInfo>,
}

/// The scope tree of a translation unit. Index 0 is the global scope.
#[derive(Debug)]
pub struct Scopes {
    scopes: Vec<Scope>,
}

impl Default for Scopes {
    fn default() -> Self {
        Self::new()
    }
}

impl Scopes {
    #[must_use]
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope {
                parent: None,
                vars: Vec::new(),
            }],
        }
    }

    #[must_use]
    pub fn create(&mut self, parent: ScopeId) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope {
            parent: Some(parent),
            vars: Vec::new(),
        });
        id
    }

    #[must_use]
    pub fn get(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0 as usize]
    }

    #[must_use]
    pub fn get_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0 as usize]
    }

    #[must_use]
    pub fn parent(&self, id: ScopeId) -> Option<ScopeId> {
        self.get(id).parent
    }

    /// Look up a variable in `scope` only.
    #[must_use]
    pub fn find_var_here(&self, scope: ScopeId, name: &Name) -> Option<&VarInfo> {
        self.get(scope).vars.iter().find(|v| &v.name == name)
    }

    #[must_use]
    pub fn find_var_here_mut(&mut self, scope: ScopeId, name: &Name) -> Option<&mut VarInfo> {
        self.get_mut(scope).vars.iter_mut().find(|v| &v.name == name)
    }

    /// Look up a variable walking outwards; returns the owning scope too.
    #[must_use]
    pub fn find_var(&self, scope: ScopeId, name: &Name) -> Option<(ScopeId, &VarInfo)> {
        let mut cur = Some(scope);
        while let Some(id) = cur {
            if let Some(var) = self.find_var_here(id, name) {
                return Some((id, var));
            }
            cur = self.parent(id);
        }
        None
    }

    #[must_use]
    pub fn find_var_mut(&mut self, scope: ScopeId, name: &Name) -> Option<(ScopeId, &mut VarInfo)> {
        let mut cur = Some(scope);
        while let Some(id) = cur {
            if self.find_var_here(id, name).is_some() {
                let var = self
                    .get_mut(id)
                    .vars
                    .iter_mut()
                    .find(|v| v.name == *name)
                    .unwrap();
                return Some((id, var));
            }
            cur = self.parent(id);
        }
        None
    }

    pub fn add_var(&mut self, scope: ScopeId, var: VarInfo) -> &mut VarInfo {
        let vars = &mut self.get_mut(scope).vars;
        vars.push(var);
        vars.last_mut().unwrap()
    }

    #[must_use]
    pub fn globals(&self) -> &[VarInfo] {
        &self.get(GLOBAL_SCOPE).vars
    }
}
