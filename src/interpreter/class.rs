use std::{cell::RefCell, rc::Rc};

use rustc_hash::FxHashMap;

use crate::ast::FieldDeclaration;

use super::{callable::ScriptFunction, scope::VariableScope, Value};

pub struct Class {
    pub name: String,
    pub superclass: Option<Rc<Class>>,
    pub constructor: Option<ScriptFunction>,
    pub methods: FxHashMap<String, ScriptFunction>,
    pub fields: Vec<FieldDeclaration>,
    /// The scope classes capture at declaration time; it carries the `super`
    /// binding when the class has a superclass. Methods close over it, and
    /// field defaults are evaluated in a child of it.
    pub closure: Rc<RefCell<VariableScope>>,
}

impl Class {
    /// Walks the superclass chain for a method, nearest class first.
    pub fn find_method(&self, name: &str) -> Option<&ScriptFunction> {
        self.methods.get(name).or_else(|| {
            self.superclass
                .as_ref()
                .and_then(|superclass| superclass.find_method(name))
        })
    }

    /// Field declarations of this class and all superclasses, base classes
    /// first so subclasses can shadow inherited defaults.
    pub fn all_fields(&self) -> Vec<(&FieldDeclaration, &Class)> {
        let mut fields = Vec::new();
        if let Some(superclass) = &self.superclass {
            fields.extend(superclass.all_fields());
        }
        fields.extend(self.fields.iter().map(|field| (field, self)));
        fields
    }
}

impl std::fmt::Debug for Class {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.name)
            .field(
                "superclass",
                &self.superclass.as_ref().map(|superclass| superclass.name.clone()),
            )
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

pub struct Instance {
    pub class: Rc<Class>,
    pub fields: FxHashMap<String, Value>,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("class", &self.class.name)
            .field("fields", &self.fields)
            .finish()
    }
}
