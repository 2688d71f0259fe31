use p3_field::Field;
use serde::{Deserialize, Serialize};

use crate::{
    field::FieldConfig,
    schema::{Module, ModuleId, Register, RegisterId, Schema},
};

/// A register produced by splitting a wider original register.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limb {
    pub width: usize,
}

/// Per-module map from each original register to its ordered limbs (least
/// significant first). Limb ids are the register ids of the subdivided
/// module, whose register table lists the limbs in limb-id order.
#[derive(Clone, Debug, Default)]
pub struct RegisterLimbsMap {
    groups: Vec<Vec<RegisterId>>,
    limbs: Vec<Limb>,
    names: Vec<String>,
}

impl RegisterLimbsMap {
    /// The limb ids of `register`, least significant first. Never empty.
    pub fn limb_ids(&self, register: RegisterId) -> &[RegisterId] {
        &self.groups[register.0]
    }

    pub fn limb(&self, limb: RegisterId) -> Limb {
        self.limbs[limb.0]
    }

    pub fn limb_name(&self, limb: RegisterId) -> &str {
        &self.names[limb.0]
    }

    pub fn num_source_registers(&self) -> usize {
        self.groups.len()
    }

    pub fn num_limbs(&self) -> usize {
        self.limbs.len()
    }

    /// Whether every register maps to exactly one limb of its own width.
    pub fn is_identity(&self) -> bool {
        self.groups.iter().all(|limbs| limbs.len() == 1)
    }

    fn push_register(&mut self, name: &str, width: usize, max_width: usize) {
        let widths = limb_widths(width, max_width);
        let mut ids = Vec::with_capacity(widths.len());
        for (index, limb_width) in widths.iter().enumerate() {
            let id = RegisterId(self.limbs.len());
            self.limbs.push(Limb { width: *limb_width });
            self.names.push(if widths.len() == 1 {
                name.to_string()
            } else {
                format!("{name}'{index}")
            });
            ids.push(id);
        }
        self.groups.push(ids);
    }
}

/// The global limb map: one [RegisterLimbsMap] per module, plus the field
/// configuration the split was derived from.
#[derive(Clone, Debug)]
pub struct LimbsMap {
    pub field: FieldConfig,
    modules: Vec<RegisterLimbsMap>,
}

impl LimbsMap {
    /// Deterministically splits every register of `schema` so that no limb
    /// exceeds the configured maximum register width.
    pub fn build<F: Field>(field: FieldConfig, schema: &Schema<F>) -> Self {
        Self::build_with(field, schema, |width, max| width.min(max))
    }

    /// The identity map: every register stays a single limb. Only valid when
    /// the schema already fits the configuration.
    pub fn identity<F: Field>(field: FieldConfig, schema: &Schema<F>) -> Self {
        Self::build_with(field, schema, |width, _| width)
    }

    fn build_with<F: Field>(
        field: FieldConfig,
        schema: &Schema<F>,
        chunk: impl Fn(usize, usize) -> usize,
    ) -> Self {
        let modules = schema
            .modules()
            .iter()
            .map(|module| {
                let mut map = RegisterLimbsMap::default();
                for register in module.registers() {
                    let max = chunk(register.width, field.max_register_width);
                    map.push_register(&register.name, register.width, max);
                }
                map
            })
            .collect();
        Self { field, modules }
    }

    /// Builds the map for externally declared modules appended after the
    /// schema's own.
    pub fn push_extern(&mut self, registers: &[Register]) -> ModuleId {
        let mut map = RegisterLimbsMap::default();
        for register in registers {
            map.push_register(&register.name, register.width, register.width);
        }
        let id = ModuleId(self.modules.len());
        self.modules.push(map);
        id
    }

    pub fn module(&self, id: ModuleId) -> &RegisterLimbsMap {
        &self.modules[id.0]
    }

    pub fn num_modules(&self) -> usize {
        self.modules.len()
    }

    /// The register table of the subdivided counterpart of `module`:
    /// the limbs, in limb-id order, keeping each source register's kind.
    pub fn target_registers<F: Field>(&self, id: ModuleId, module: &Module<F>) -> Vec<Register> {
        let map = self.module(id);
        let mut out = vec![None; map.num_limbs()];
        for (index, register) in module.registers().iter().enumerate() {
            for limb_id in map.limb_ids(RegisterId(index)) {
                out[limb_id.0] = Some(Register::new(
                    map.limb_name(*limb_id),
                    map.limb(*limb_id).width,
                    register.kind,
                ));
            }
        }
        out.into_iter().map(Option::unwrap).collect()
    }
}

/// The limb widths of a `width`-bit register under `max` bits per limb,
/// least significant first: full limbs, then the remainder.
pub fn limb_widths(width: usize, max: usize) -> Vec<usize> {
    assert!(max > 0);
    if width == 0 {
        return vec![0];
    }
    let mut out = Vec::with_capacity(width.div_ceil(max));
    let mut remaining = width;
    while remaining > 0 {
        let limb = remaining.min(max);
        out.push(limb);
        remaining -= limb;
    }
    out
}
