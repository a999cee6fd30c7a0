//! Ingest pipeline: raw JSON records to storable vectors.
//!
//! A pipeline is an ordered list of stages. Each stage runs one operator
//! from the [`OperatorRegistry`] and declares the fields it reads and the
//! field it writes; [`PipelineBuilder::build`] rejects a stage that reads a
//! field nothing upstream provides. After the last stage the sink pulls out
//! the id and vector fields and keeps the rest as payload.

use crate::error::{PipelineError, PipelineResult};
use sculpin_core::distance::normalize;
use sculpin_core::VectorId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};

/// A record flowing through the pipeline.
pub type Record = Map<String, Value>;

/// Field wiring for one stage.
#[derive(Debug, Clone, Default)]
pub struct StageFields {
    pub inputs: Vec<String>,
    pub output: Option<String>,
}

impl StageFields {
    fn single_input(&self, operator: &str) -> PipelineResult<&str> {
        match self.inputs.as_slice() {
            [field] => Ok(field),
            _ => Err(PipelineError::InvalidParams {
                operator: operator.to_string(),
                message: "expects exactly one input field".to_string(),
            }),
        }
    }

    /// Output field, defaulting to the single input (in-place transform).
    fn output_or_input(&self, operator: &str) -> PipelineResult<String> {
        let input = self.single_input(operator)?;
        Ok(self.output.clone().unwrap_or_else(|| input.to_string()))
    }
}

/// A named record transform.
pub trait Operator: Send + Sync {
    /// Bind the operator to its fields and parameters.
    fn configure(&mut self, fields: &StageFields, params: &Value) -> PipelineResult<()>;

    /// Transform one record.
    fn apply(&self, record: Record) -> PipelineResult<Record>;

    /// Fields this stage adds to the record.
    fn produces(&self) -> Vec<String> {
        Vec::new()
    }

    /// Fields this stage takes away from the record.
    fn consumes(&self) -> Vec<String> {
        Vec::new()
    }
}

fn take_field<'a>(record: &'a Record, field: &str) -> PipelineResult<&'a Value> {
    match record.get(field) {
        Some(Value::Null) | None => Err(PipelineError::MissingField(field.to_string())),
        Some(value) => Ok(value),
    }
}

fn invalid(field: &str, message: impl Into<String>) -> PipelineError {
    PipelineError::InvalidField {
        field: field.to_string(),
        message: message.into(),
    }
}

/// Read a numeric array field as `f32` components.
fn numbers(value: &Value, field: &str) -> PipelineResult<Vec<f32>> {
    let Value::Array(items) = value else {
        return Err(invalid(field, "expected an array of numbers"));
    };
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            item.as_f64()
                .map(|x| x as f32)
                .ok_or_else(|| invalid(field, format!("element {} is not a number", i)))
        })
        .collect()
}

fn to_array(vector: Vec<f32>) -> Value {
    Value::Array(vector.into_iter().map(Value::from).collect())
}

/// Turns a numeric array or a delimited string ("0.1, 0.2 0.3") into a
/// numeric array.
#[derive(Default)]
struct ParseVector {
    input: String,
    output: String,
}

impl Operator for ParseVector {
    fn configure(&mut self, fields: &StageFields, _params: &Value) -> PipelineResult<()> {
        self.input = fields.single_input("parse_vector")?.to_string();
        self.output = fields.output_or_input("parse_vector")?;
        Ok(())
    }

    fn apply(&self, mut record: Record) -> PipelineResult<Record> {
        let value = take_field(&record, &self.input)?;
        let vector = match value {
            Value::String(text) => text
                .trim()
                .trim_start_matches('[')
                .trim_end_matches(']')
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|part| !part.is_empty())
                .map(|part| {
                    part.parse::<f32>()
                        .map_err(|_| invalid(&self.input, format!("'{}' is not a number", part)))
                })
                .collect::<PipelineResult<Vec<f32>>>()?,
            other => numbers(other, &self.input)?,
        };
        record.insert(self.output.clone(), to_array(vector));
        Ok(record)
    }

    fn produces(&self) -> Vec<String> {
        vec![self.output.clone()]
    }
}

/// Scales a numeric array to unit length.
#[derive(Default)]
struct Normalize {
    input: String,
    output: String,
}

impl Operator for Normalize {
    fn configure(&mut self, fields: &StageFields, _params: &Value) -> PipelineResult<()> {
        self.input = fields.single_input("normalize")?.to_string();
        self.output = fields.output_or_input("normalize")?;
        Ok(())
    }

    fn apply(&self, mut record: Record) -> PipelineResult<Record> {
        let mut vector = numbers(take_field(&record, &self.input)?, &self.input)?;
        normalize(&mut vector);
        record.insert(self.output.clone(), to_array(vector));
        Ok(record)
    }

    fn produces(&self) -> Vec<String> {
        vec![self.output.clone()]
    }
}

/// Multiplies a numeric array by `params.factor`.
struct Scale {
    input: String,
    output: String,
    factor: f32,
}

impl Default for Scale {
    fn default() -> Self {
        Self {
            input: String::new(),
            output: String::new(),
            factor: 1.0,
        }
    }
}

impl Operator for Scale {
    fn configure(&mut self, fields: &StageFields, params: &Value) -> PipelineResult<()> {
        self.input = fields.single_input("scale")?.to_string();
        self.output = fields.output_or_input("scale")?;
        self.factor = params
            .get("factor")
            .and_then(Value::as_f64)
            .map(|f| f as f32)
            .filter(|f| f.is_finite())
            .ok_or_else(|| PipelineError::InvalidParams {
                operator: "scale".to_string(),
                message: "requires a finite numeric 'factor'".to_string(),
            })?;
        Ok(())
    }

    fn apply(&self, mut record: Record) -> PipelineResult<Record> {
        let vector = numbers(take_field(&record, &self.input)?, &self.input)?;
        let scaled = vector.into_iter().map(|x| x * self.factor).collect();
        record.insert(self.output.clone(), to_array(scaled));
        Ok(record)
    }

    fn produces(&self) -> Vec<String> {
        vec![self.output.clone()]
    }
}

/// Moves a field to a new name.
#[derive(Default)]
struct Rename {
    input: String,
    output: String,
}

impl Operator for Rename {
    fn configure(&mut self, fields: &StageFields, _params: &Value) -> PipelineResult<()> {
        self.input = fields.single_input("rename")?.to_string();
        self.output = fields.output.clone().ok_or_else(|| PipelineError::InvalidParams {
            operator: "rename".to_string(),
            message: "requires an output field".to_string(),
        })?;
        Ok(())
    }

    fn apply(&self, mut record: Record) -> PipelineResult<Record> {
        let value = record
            .remove(&self.input)
            .ok_or_else(|| PipelineError::MissingField(self.input.clone()))?;
        record.insert(self.output.clone(), value);
        Ok(record)
    }

    fn produces(&self) -> Vec<String> {
        vec![self.output.clone()]
    }

    fn consumes(&self) -> Vec<String> {
        vec![self.input.clone()]
    }
}

/// Removes fields if present.
#[derive(Default)]
struct DropFields {
    fields: Vec<String>,
}

impl Operator for DropFields {
    fn configure(&mut self, fields: &StageFields, _params: &Value) -> PipelineResult<()> {
        self.fields = fields.inputs.clone();
        Ok(())
    }

    fn apply(&self, mut record: Record) -> PipelineResult<Record> {
        for field in &self.fields {
            record.remove(field);
        }
        Ok(record)
    }

    fn consumes(&self) -> Vec<String> {
        self.fields.clone()
    }
}

/// Fails the record unless every input field is present and non-null.
#[derive(Default)]
struct Require {
    fields: Vec<String>,
}

impl Operator for Require {
    fn configure(&mut self, fields: &StageFields, _params: &Value) -> PipelineResult<()> {
        self.fields = fields.inputs.clone();
        Ok(())
    }

    fn apply(&self, record: Record) -> PipelineResult<Record> {
        for field in &self.fields {
            take_field(&record, field)?;
        }
        Ok(record)
    }
}

type Factory = fn() -> Box<dyn Operator>;

/// Name -> operator factory table, fixed once constructed.
pub struct OperatorRegistry {
    factories: HashMap<&'static str, Factory>,
}

impl OperatorRegistry {
    /// Registry with every built-in operator.
    pub fn builtin() -> Self {
        let mut factories: HashMap<&'static str, Factory> = HashMap::new();
        factories.insert("parse_vector", || Box::new(ParseVector::default()) as Box<dyn Operator>);
        factories.insert("normalize", || Box::new(Normalize::default()) as Box<dyn Operator>);
        factories.insert("scale", || Box::new(Scale::default()) as Box<dyn Operator>);
        factories.insert("rename", || Box::new(Rename::default()) as Box<dyn Operator>);
        factories.insert("drop_fields", || Box::new(DropFields::default()) as Box<dyn Operator>);
        factories.insert("require", || Box::new(Require::default()) as Box<dyn Operator>);
        Self { factories }
    }

    /// A fresh, unconfigured operator.
    pub fn create(&self, name: &str) -> PipelineResult<Box<dyn Operator>> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| PipelineError::UnknownOperator(name.to_string()))
    }

    /// Registered operator names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.factories.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

/// Serializable description of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    pub operator: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

/// Serializable description of a whole pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSpec {
    /// Fields a raw record may carry on arrival.
    pub source_fields: Vec<String>,
    pub stages: Vec<StageSpec>,
    /// Field holding the optional id.
    pub id_field: String,
    /// Field holding the vector after the last stage.
    pub vector_field: String,
}

impl Default for PipelineSpec {
    fn default() -> Self {
        Self {
            source_fields: vec!["id".into(), "vector".into(), "payload".into()],
            stages: Vec::new(),
            id_field: "id".into(),
            vector_field: "vector".into(),
        }
    }
}

/// Output of a pipeline: ready for the vector store.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestRecord {
    pub id: Option<VectorId>,
    pub vector: Vec<f32>,
    pub payload: Option<Value>,
}

struct Stage {
    name: String,
    operator: Box<dyn Operator>,
}

/// Assembles and type-checks a pipeline.
pub struct PipelineBuilder<'r> {
    registry: &'r OperatorRegistry,
    available: BTreeSet<String>,
    stages: Vec<Stage>,
    id_field: String,
    vector_field: String,
}

impl<'r> PipelineBuilder<'r> {
    pub fn new<I, S>(registry: &'r OperatorRegistry, source_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            registry,
            available: source_fields.into_iter().map(Into::into).collect(),
            stages: Vec::new(),
            id_field: "id".into(),
            vector_field: "vector".into(),
        }
    }

    /// Build from a serialized spec.
    pub fn from_spec(registry: &'r OperatorRegistry, spec: &PipelineSpec) -> PipelineResult<Pipeline> {
        let mut builder = Self::new(registry, spec.source_fields.iter().cloned())
            .sink(&spec.id_field, &spec.vector_field);
        for stage in &spec.stages {
            builder = builder.stage(
                &stage.operator,
                StageFields {
                    inputs: stage.inputs.clone(),
                    output: stage.output.clone(),
                },
                &stage.params,
            )?;
        }
        builder.build()
    }

    /// Append a stage; its inputs must already be available.
    pub fn stage(mut self, operator: &str, fields: StageFields, params: &Value) -> PipelineResult<Self> {
        if let Some(missing) = fields.inputs.iter().find(|f| !self.available.contains(*f)) {
            return Err(PipelineError::UndeclaredField {
                stage: self.stages.len(),
                operator: operator.to_string(),
                field: missing.clone(),
            });
        }

        let mut op = self.registry.create(operator)?;
        op.configure(&fields, params)?;
        for field in op.consumes() {
            self.available.remove(&field);
        }
        self.available.extend(op.produces());
        self.stages.push(Stage {
            name: operator.to_string(),
            operator: op,
        });
        Ok(self)
    }

    /// Set the fields the sink reads the id and vector from.
    pub fn sink(mut self, id_field: &str, vector_field: &str) -> Self {
        self.id_field = id_field.to_string();
        self.vector_field = vector_field.to_string();
        self
    }

    pub fn build(self) -> PipelineResult<Pipeline> {
        if !self.available.contains(&self.vector_field) {
            return Err(PipelineError::UndeclaredField {
                stage: self.stages.len(),
                operator: "sink".to_string(),
                field: self.vector_field,
            });
        }
        Ok(Pipeline {
            stages: self.stages,
            id_field: self.id_field,
            vector_field: self.vector_field,
        })
    }
}

/// A type-checked sequence of stages plus the sink.
pub struct Pipeline {
    stages: Vec<Stage>,
    id_field: String,
    vector_field: String,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .field("id_field", &self.id_field)
            .field("vector_field", &self.vector_field)
            .finish()
    }
}

impl Pipeline {
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Run one raw value through every stage and the sink.
    pub fn run(&self, raw: Value) -> PipelineResult<IngestRecord> {
        let Value::Object(mut record) = raw else {
            return Err(invalid("<record>", "expected a JSON object"));
        };
        for stage in &self.stages {
            record = stage.operator.apply(record)?;
        }
        self.sink(record)
    }

    fn sink(&self, mut record: Record) -> PipelineResult<IngestRecord> {
        let id = match record.remove(&self.id_field) {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => Some(
                n.as_u64()
                    .map(VectorId)
                    .ok_or_else(|| invalid(&self.id_field, "expected a non-negative integer"))?,
            ),
            Some(Value::String(s)) => Some(
                s.parse::<u64>()
                    .map(VectorId)
                    .map_err(|_| invalid(&self.id_field, "expected a non-negative integer"))?,
            ),
            Some(_) => return Err(invalid(&self.id_field, "expected a non-negative integer")),
        };

        let vector = match record.remove(&self.vector_field) {
            None | Some(Value::Null) => {
                return Err(PipelineError::MissingField(self.vector_field.clone()))
            }
            Some(value) => numbers(&value, &self.vector_field)?,
        };

        let payload = match record.len() {
            0 => None,
            1 if record.contains_key("payload") => record.remove("payload"),
            _ => Some(Value::Object(record)),
        };

        Ok(IngestRecord { id, vector, payload })
    }
}
