//! Tree-walking evaluator for the notebook script language.
//!
//! Everything runs synchronously on the calling thread. Async functions
//! complete before they return and hand back an already settled promise, so
//! `await` only ever unwraps.

use crate::errors::RuntimeError;
use crate::parser::{
    AssignOperator, BinaryOperator, Declaration, DeclarationKind, Element, ExportDeclaration,
    Expression, FunctionBody, FunctionDefinition, LogicalOperator, ObjectMember, Parameter, Pattern,
    PatternElement, PatternProperty, SourceCode, Span, Spanned, Statement, TemplatePart,
    UnaryOperator, UpdateOperator,
};
use indexmap::IndexMap;
use std::rc::Rc;

mod builtins;
pub use builtins::{inspect, json_text};
use builtins::Prototypes;

mod scope;
pub use scope::{AssignError, Scope};

mod value;
pub use value::{
    ArrayRef, Function, FunctionKind, Namespace, NativeFunction, ObjectClass, ObjectRef, Promise,
    PromiseState, THEN_PROBE, Value, number_to_string,
};

/// Something that stops normal evaluation.
#[derive(Debug, Clone)]
pub enum Exception {
    /// A script-level `throw`, catchable by `try`/`catch`.
    Throw { value: Value, offset: Option<usize> },
    /// A link failure of the import machinery. Never catchable.
    Link(RuntimeError),
    /// The step budget ran out or evaluation cannot make progress.
    Interrupted(String),
}

impl Exception {
    pub fn throw(value: Value) -> Self {
        Self::Throw {
            value,
            offset: None,
        }
    }

    pub fn is_catchable(&self) -> bool {
        matches!(self, Self::Throw { .. })
    }

    pub fn thrown_value(&self) -> Option<&Value> {
        match self {
            Self::Throw { value, .. } => Some(value),
            _ => None,
        }
    }

    /// `"Name: message"` style text of the exception.
    pub fn message(&self) -> String {
        match self {
            Self::Throw { value, .. } => value.to_js_string(),
            Self::Link(error) => format!("RuntimeError: {error}"),
            Self::Interrupted(reason) => reason.clone(),
        }
    }
}

impl From<RuntimeError> for Exception {
    fn from(error: RuntimeError) -> Self {
        Self::Link(error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_steps: u64,
    pub max_call_depth: usize,
    /// Statements and expressions being evaluated at once, counted across
    /// calls.
    pub max_eval_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_steps: 5_000_000,
            max_call_depth: 200,
            max_eval_depth: 4_000,
        }
    }
}

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

#[derive(Clone, Copy)]
enum BindMode {
    Declare { mutable: bool },
    Assign,
}

struct Frame {
    name: String,
    call_offset: usize,
}

/// One line written by `console.*` or the capability object's `log`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct LogEntry {
    pub level: &'static str,
    pub message: String,
}

pub struct Interpreter {
    source: SourceCode,
    globals: Scope,
    prototypes: Rc<Prototypes>,
    limits: Limits,
    steps: u64,
    frames: Vec<Frame>,
    depth: usize,
    /// Byte offset of the construct being evaluated.
    offset: usize,
    logs: Vec<LogEntry>,
}

impl Interpreter {
    pub fn new(source: SourceCode, limits: Limits) -> Self {
        let globals = Scope::global();
        builtins::install_globals(&globals);
        Self {
            source,
            globals,
            prototypes: Rc::new(Prototypes::new()),
            limits,
            steps: 0,
            frames: Vec::new(),
            depth: 0,
            offset: 0,
            logs: Vec::new(),
        }
    }

    pub fn source(&self) -> &SourceCode {
        &self.source
    }

    pub fn globals(&self) -> &Scope {
        &self.globals
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn log(&mut self, level: log::Level, message: String) {
        log::log!(target: "notebook::console", level, "{message}");
        let level = match level {
            log::Level::Error => "error",
            log::Level::Warn => "warn",
            log::Level::Info => "info",
            log::Level::Debug | log::Level::Trace => "debug",
        };
        self.logs.push(LogEntry { level, message });
    }

    pub fn take_logs(&mut self) -> Vec<LogEntry> {
        std::mem::take(&mut self.logs)
    }

    /// Executes top-level statements in the global scope.
    pub fn run_program(&mut self, statements: &[Spanned<Statement>]) -> Result<(), Exception> {
        let globals = self.globals.clone();
        match self.execute_block(statements, &globals)? {
            Flow::Normal => Ok(()),
            _ => Err(self.throw_error("SyntaxError", "Illegal top-level control flow")),
        }
    }

    /// Drops global bindings so closures and scopes can be freed.
    pub fn release(&self) {
        self.globals.clear();
    }

    fn tick(&mut self) -> Result<(), Exception> {
        self.steps += 1;
        if self.steps > self.limits.max_steps {
            return Err(Exception::Interrupted(format!(
                "Execution exceeded the budget of {} steps",
                self.limits.max_steps
            )));
        }
        Ok(())
    }

    /// Counts one more level of nesting; callers decrement `depth` when done.
    fn enter(&mut self) -> Result<(), Exception> {
        if self.depth >= self.limits.max_eval_depth {
            return Err(self.throw_error("RangeError", "Maximum evaluation depth exceeded"));
        }
        self.depth += 1;
        Ok(())
    }

    // Errors

    pub fn make_error(&self, name: &str, message: &str) -> Value {
        let mut properties = IndexMap::new();
        properties.insert("name".to_string(), Value::string(name));
        properties.insert("message".to_string(), Value::string(message));
        properties.insert("stack".to_string(), Value::string(self.stack_trace(name, message)));
        Value::Object(Rc::new(ObjectRef::with_class(
            properties,
            ObjectClass::Error {
                origin: Some(self.offset),
            },
        )))
    }

    pub fn throw_error(&self, name: &str, message: &str) -> Exception {
        Exception::Throw {
            value: self.make_error(name, message),
            offset: Some(self.offset),
        }
    }

    pub fn type_error(&self, message: impl AsRef<str>) -> Exception {
        self.throw_error("TypeError", message.as_ref())
    }

    fn stack_trace(&self, name: &str, message: &str) -> String {
        let mut stack = if message.is_empty() {
            name.to_string()
        } else {
            format!("{name}: {message}")
        };
        let mut offset = self.offset;
        for frame in self.frames.iter().rev() {
            let (line, column) = self.source.line_col(offset);
            stack.push_str(&format!("\n    at {} (<anonymous>:{line}:{column})", frame.name));
            offset = frame.call_offset;
        }
        if self.frames.is_empty() {
            let (line, column) = self.source.line_col(offset);
            stack.push_str(&format!("\n    at <anonymous>:{line}:{column}"));
        }
        stack
    }

    fn source_text(&self, span: Span) -> &str {
        self.source.as_str().get(span.into_range()).unwrap_or("expression")
    }

    // Statements

    fn execute_block(
        &mut self,
        statements: &[Spanned<Statement>],
        scope: &Scope,
    ) -> Result<Flow, Exception> {
        self.hoist_functions(statements, scope);
        for statement in statements {
            let flow = self.execute(statement, scope)?;
            if !matches!(flow, Flow::Normal) {
                return Ok(flow);
            }
        }
        Ok(Flow::Normal)
    }

    fn hoist_functions(&mut self, statements: &[Spanned<Statement>], scope: &Scope) {
        for statement in statements {
            let definition = match &statement.node {
                Statement::Function(definition) => definition,
                Statement::Export(ExportDeclaration::Declaration(inner)) => match &inner.node {
                    Statement::Function(definition) => definition,
                    _ => continue,
                },
                _ => continue,
            };
            if let Some(name) = &definition.name {
                let function = self.make_closure(definition, scope, None);
                scope.declare(name.clone(), function, true);
            }
        }
    }

    fn execute(&mut self, statement: &Spanned<Statement>, scope: &Scope) -> Result<Flow, Exception> {
        self.enter()?;
        let flow = self.execute_statement(statement, scope);
        self.depth -= 1;
        flow
    }

    fn execute_statement(&mut self, statement: &Spanned<Statement>, scope: &Scope) -> Result<Flow, Exception> {
        self.tick()?;
        self.offset = statement.span.start;
        match &statement.node {
            Statement::Declaration(declaration) => self.declare(declaration, scope)?,
            Statement::Function(definition) => {
                if let Some(name) = &definition.name {
                    if !scope.has_own(name) {
                        let function = self.make_closure(definition, scope, None);
                        scope.declare(name.clone(), function, true);
                    }
                }
            }
            Statement::Return(expression) => {
                let value = match expression {
                    Some(expression) => self.evaluate(expression, scope)?,
                    None => Value::Undefined,
                };
                return Ok(Flow::Return(value));
            }
            Statement::If {
                test,
                consequent,
                alternate,
            } => {
                if self.evaluate(test, scope)?.is_truthy() {
                    return self.execute(consequent, &scope.child());
                }
                if let Some(alternate) = alternate {
                    return self.execute(alternate, &scope.child());
                }
            }
            Statement::While { test, body } => loop {
                self.tick()?;
                if !self.evaluate(test, scope)?.is_truthy() {
                    break;
                }
                match self.execute(body, &scope.child())? {
                    Flow::Break => break,
                    flow @ Flow::Return(_) => return Ok(flow),
                    Flow::Normal | Flow::Continue => {}
                }
            },
            Statement::For {
                init,
                test,
                update,
                body,
            } => {
                let loop_scope = scope.child();
                if let Some(init) = init {
                    self.execute(init, &loop_scope)?;
                }
                loop {
                    self.tick()?;
                    if let Some(test) = test {
                        if !self.evaluate(test, &loop_scope)?.is_truthy() {
                            break;
                        }
                    }
                    match self.execute(body, &loop_scope.child())? {
                        Flow::Break => break,
                        flow @ Flow::Return(_) => return Ok(flow),
                        Flow::Normal | Flow::Continue => {}
                    }
                    if let Some(update) = update {
                        self.evaluate(update, &loop_scope)?;
                    }
                }
            }
            Statement::ForOf {
                kind,
                pattern,
                iterable,
                body,
            } => {
                let iterable = self.evaluate(iterable, scope)?;
                let items = self.iterate(&iterable)?;
                return self.execute_loop_body(items, *kind, pattern, body, scope);
            }
            Statement::ForIn {
                kind,
                pattern,
                object,
                body,
            } => {
                let object = self.evaluate(object, scope)?;
                let keys = own_entries(&object)
                    .into_iter()
                    .map(|(key, _)| Value::string(key))
                    .collect();
                return self.execute_loop_body(keys, *kind, pattern, body, scope);
            }
            Statement::Break => return Ok(Flow::Break),
            Statement::Continue => return Ok(Flow::Continue),
            Statement::Throw(expression) => {
                let value = self.evaluate(expression, scope)?;
                return Err(Exception::Throw {
                    value,
                    offset: Some(statement.span.start),
                });
            }
            Statement::Try {
                block,
                handler,
                finalizer,
            } => {
                let mut result = self.execute_block(block, &scope.child());
                let thrown = match &result {
                    Err(exception) => exception.thrown_value().cloned(),
                    Ok(_) => None,
                };
                if let (Some(thrown), Some(handler)) = (thrown, handler) {
                    let handler_scope = scope.child();
                    result = match &handler.parameter {
                        Some(parameter) => self
                            .bind_pattern(
                                parameter,
                                thrown,
                                &handler_scope,
                                BindMode::Declare { mutable: true },
                            )
                            .and_then(|()| self.execute_block(&handler.body, &handler_scope)),
                        None => self.execute_block(&handler.body, &handler_scope),
                    };
                }
                if let Some(finalizer) = finalizer {
                    if matches!(result, Err(Exception::Interrupted(_))) {
                        return result;
                    }
                    match self.execute_block(finalizer, &scope.child())? {
                        Flow::Normal => {}
                        flow => return Ok(flow),
                    }
                }
                return result;
            }
            Statement::Block(statements) => return self.execute_block(statements, &scope.child()),
            Statement::Expression(expression) => {
                self.evaluate(expression, scope)?;
            }
            Statement::Import(_) => {
                return Err(self.throw_error(
                    "SyntaxError",
                    "Cannot use import statement outside a module",
                ));
            }
            Statement::Export(_) => {
                return Err(self.throw_error("SyntaxError", "Unexpected token 'export'"));
            }
            Statement::Empty => {}
        }
        Ok(Flow::Normal)
    }

    fn execute_loop_body(
        &mut self,
        items: Vec<Value>,
        kind: DeclarationKind,
        pattern: &Pattern,
        body: &Spanned<Statement>,
        scope: &Scope,
    ) -> Result<Flow, Exception> {
        for item in items {
            self.tick()?;
            let iteration_scope = scope.child();
            self.bind_pattern(
                pattern,
                item,
                &iteration_scope,
                BindMode::Declare {
                    mutable: kind != DeclarationKind::Const,
                },
            )?;
            match self.execute(body, &iteration_scope)? {
                Flow::Break => break,
                flow @ Flow::Return(_) => return Ok(flow),
                Flow::Normal | Flow::Continue => {}
            }
        }
        Ok(Flow::Normal)
    }

    fn declare(&mut self, declaration: &Declaration, scope: &Scope) -> Result<(), Exception> {
        let mutable = declaration.kind != DeclarationKind::Const;
        for declarator in &declaration.declarators {
            let value = match (&declarator.init, &declarator.pattern.node) {
                (Some(init), Pattern::Identifier(name)) => self.evaluate_named(init, scope, name)?,
                (Some(init), _) => self.evaluate(init, scope)?,
                (None, _) => Value::Undefined,
            };
            self.bind_pattern(
                &declarator.pattern.node,
                value,
                scope,
                BindMode::Declare { mutable },
            )?;
        }
        Ok(())
    }

    fn bind_pattern(
        &mut self,
        pattern: &Pattern,
        value: Value,
        scope: &Scope,
        mode: BindMode,
    ) -> Result<(), Exception> {
        match pattern {
            Pattern::Identifier(name) => match mode {
                BindMode::Declare { mutable } => {
                    scope.declare(name.clone(), value, mutable);
                    Ok(())
                }
                BindMode::Assign => self.assign_variable(name, value, scope),
            },
            Pattern::Object { properties, rest } => {
                if value.is_nullish() {
                    return Err(self.type_error(format!(
                        "Cannot destructure '{}' as it is {}.",
                        value.to_js_string(),
                        value.to_js_string()
                    )));
                }
                for PatternProperty {
                    key,
                    value: target,
                    default,
                } in properties
                {
                    let mut property = self.get_property(&value, key)?;
                    if let (Value::Undefined, Some(default)) = (&property, default) {
                        property = self.evaluate(default, scope)?;
                    }
                    self.bind_pattern(target, property, scope, mode)?;
                }
                if let Some(rest) = rest {
                    let remaining = own_entries(&value)
                        .into_iter()
                        .filter(|(key, _)| !properties.iter().any(|property| &property.key == key))
                        .collect();
                    let remaining = Value::object(remaining);
                    self.bind_pattern(&Pattern::Identifier(rest.clone()), remaining, scope, mode)?;
                }
                Ok(())
            }
            Pattern::Array { elements, rest } => {
                let items = self.iterate(&value)?;
                for (index, PatternElement { pattern, default }) in elements.iter().enumerate() {
                    let mut item = items.get(index).cloned().unwrap_or(Value::Undefined);
                    if let (Value::Undefined, Some(default)) = (&item, default) {
                        item = self.evaluate(default, scope)?;
                    }
                    self.bind_pattern(pattern, item, scope, mode)?;
                }
                if let Some(rest) = rest {
                    let remaining = items.get(elements.len()..).unwrap_or_default().to_vec();
                    self.bind_pattern(rest, Value::array(remaining), scope, mode)?;
                }
                Ok(())
            }
        }
    }

    fn bind_parameters(
        &mut self,
        parameters: &[Parameter],
        mut arguments: Vec<Value>,
        scope: &Scope,
    ) -> Result<(), Exception> {
        for (index, parameter) in parameters.iter().enumerate() {
            let mut value = if parameter.rest {
                Value::array(if index < arguments.len() {
                    arguments.split_off(index)
                } else {
                    Vec::new()
                })
            } else {
                arguments.get(index).cloned().unwrap_or(Value::Undefined)
            };
            if let (Value::Undefined, Some(default)) = (&value, &parameter.default) {
                value = self.evaluate(default, scope)?;
            }
            self.bind_pattern(
                &parameter.pattern,
                value,
                scope,
                BindMode::Declare { mutable: true },
            )?;
        }
        Ok(())
    }

    fn assign_variable(&mut self, name: &str, value: Value, scope: &Scope) -> Result<(), Exception> {
        scope.assign(name, value).map_err(|error| match error {
            AssignError::NotDefined => {
                self.throw_error("ReferenceError", &format!("{name} is not defined"))
            }
            AssignError::Constant => self.type_error("Assignment to constant variable."),
        })
    }

    // Expressions

    fn evaluate_named(
        &mut self,
        expression: &Spanned<Expression>,
        scope: &Scope,
        name: &str,
    ) -> Result<Value, Exception> {
        match &expression.node {
            Expression::Function(definition) => Ok(self.make_closure(definition, scope, Some(name))),
            _ => self.evaluate(expression, scope),
        }
    }

    fn make_closure(
        &self,
        definition: &Rc<FunctionDefinition>,
        scope: &Scope,
        name: Option<&str>,
    ) -> Value {
        let mut function = Function::closure(definition.clone(), scope.clone(), self.source.clone());
        if let (true, Some(name)) = (function.name.is_empty(), name) {
            function.name = name.to_string();
        }
        Value::Function(Rc::new(function))
    }

    pub fn evaluate(
        &mut self,
        expression: &Spanned<Expression>,
        scope: &Scope,
    ) -> Result<Value, Exception> {
        self.enter()?;
        let result = self.evaluate_expression(expression, scope);
        self.depth -= 1;
        result
    }

    fn evaluate_expression(
        &mut self,
        expression: &Spanned<Expression>,
        scope: &Scope,
    ) -> Result<Value, Exception> {
        let value = match &expression.node {
            Expression::Number(number) => Value::Number(*number),
            Expression::Text(text) => Value::string(text),
            Expression::Boolean(boolean) => Value::Boolean(*boolean),
            Expression::Null => Value::Null,
            Expression::Undefined => Value::Undefined,
            Expression::This => scope.lookup("this").unwrap_or(Value::Undefined),
            Expression::Template(parts) => {
                let mut text = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Text(literal) => text.push_str(literal),
                        TemplatePart::Expression(interpolation) => {
                            let parsed = interpolation
                                .expression()
                                .map_err(|message| self.throw_error("SyntaxError", &message))?;
                            text.push_str(&self.evaluate(&parsed, scope)?.to_js_string());
                        }
                    }
                }
                Value::string(text)
            }
            Expression::Identifier(name) => match scope.lookup(name) {
                Some(value) => value,
                None => {
                    self.offset = expression.span.start;
                    return Err(self.throw_error("ReferenceError", &format!("{name} is not defined")));
                }
            },
            Expression::Array(elements) => Value::array(self.evaluate_elements(elements, scope)?),
            Expression::Object(members) => self.evaluate_object(members, scope)?,
            Expression::Function(definition) => self.make_closure(definition, scope, None),
            Expression::Unary { operator, operand } => {
                if let (UnaryOperator::Typeof, Expression::Identifier(name)) =
                    (operator, &operand.node)
                {
                    let value = scope.lookup(name).unwrap_or(Value::Undefined);
                    return Ok(Value::string(value.type_of()));
                }
                let operand = self.evaluate(operand, scope)?;
                match operator {
                    UnaryOperator::Not => Value::Boolean(!operand.is_truthy()),
                    UnaryOperator::Negate => Value::Number(-operand.to_number()),
                    UnaryOperator::Plus => Value::Number(operand.to_number()),
                    UnaryOperator::Typeof => Value::string(operand.type_of()),
                }
            }
            Expression::Update {
                operator,
                prefix,
                target,
            } => {
                let old = self.evaluate(target, scope)?.to_number();
                let new = match operator {
                    UpdateOperator::Increment => old + 1.0,
                    UpdateOperator::Decrement => old - 1.0,
                };
                self.assign_to(target, Value::Number(new), scope)?;
                Value::Number(if *prefix { new } else { old })
            }
            Expression::Binary {
                operator,
                left,
                right,
            } => {
                let left = self.evaluate(left, scope)?;
                let right = self.evaluate(right, scope)?;
                self.offset = expression.span.start;
                self.binary(*operator, left, right)?
            }
            Expression::Logical {
                operator,
                left,
                right,
            } => {
                let left = self.evaluate(left, scope)?;
                let short_circuits = match operator {
                    LogicalOperator::And => !left.is_truthy(),
                    LogicalOperator::Or => left.is_truthy(),
                    LogicalOperator::Nullish => !left.is_nullish(),
                };
                if short_circuits {
                    left
                } else {
                    self.evaluate(right, scope)?
                }
            }
            Expression::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.evaluate(test, scope)?.is_truthy() {
                    self.evaluate(consequent, scope)?
                } else {
                    self.evaluate(alternate, scope)?
                }
            }
            Expression::Assign {
                operator,
                target,
                value,
            } => {
                let value = match (operator, &target.node) {
                    (AssignOperator::Assign, Expression::Identifier(name)) => {
                        self.evaluate_named(value, scope, name)?
                    }
                    (AssignOperator::Assign, _) => self.evaluate(value, scope)?,
                    (AssignOperator::Nullish, _) => {
                        let current = self.evaluate(target, scope)?;
                        if !current.is_nullish() {
                            return Ok(current);
                        }
                        self.evaluate(value, scope)?
                    }
                    (compound, _) => {
                        let current = self.evaluate(target, scope)?;
                        let operand = self.evaluate(value, scope)?;
                        self.binary(compound_operator(*compound), current, operand)?
                    }
                };
                self.offset = expression.span.start;
                self.assign_to(target, value.clone(), scope)?;
                value
            }
            Expression::Call { .. } | Expression::Member { .. } | Expression::Index { .. } => {
                self.evaluate_chain(expression, scope)?.unwrap_or(Value::Undefined)
            }
            Expression::New { callee, arguments } => {
                let constructor = self.evaluate(callee, scope)?;
                let arguments = self.evaluate_elements(arguments, scope)?;
                self.offset = expression.span.start;
                self.construct(&constructor, arguments, callee.span)?
            }
            Expression::Await(operand) => {
                let value = self.evaluate(operand, scope)?;
                self.await_value(value)?
            }
        };
        Ok(value)
    }

    /// Evaluates member, index and call expressions. `None` means an optional
    /// link short-circuited the whole chain.
    fn evaluate_chain(
        &mut self,
        expression: &Spanned<Expression>,
        scope: &Scope,
    ) -> Result<Option<Value>, Exception> {
        match &expression.node {
            Expression::Member {
                object,
                property,
                optional,
            } => {
                let Some(object) = self.evaluate_chain(object, scope)? else {
                    return Ok(None);
                };
                if *optional && object.is_nullish() {
                    return Ok(None);
                }
                self.offset = expression.span.start;
                self.get_property(&object, property).map(Some)
            }
            Expression::Index {
                object,
                index,
                optional,
            } => {
                let Some(object) = self.evaluate_chain(object, scope)? else {
                    return Ok(None);
                };
                if *optional && object.is_nullish() {
                    return Ok(None);
                }
                let key = property_key(&self.evaluate(index, scope)?);
                self.offset = expression.span.start;
                self.get_property(&object, &key).map(Some)
            }
            Expression::Call {
                callee,
                arguments,
                optional,
            } => {
                let (this, function) = match &callee.node {
                    Expression::Member {
                        object,
                        property,
                        optional: member_optional,
                    } => {
                        let Some(object) = self.evaluate_chain(object, scope)? else {
                            return Ok(None);
                        };
                        if *member_optional && object.is_nullish() {
                            return Ok(None);
                        }
                        self.offset = callee.span.start;
                        let function = self.get_property(&object, property)?;
                        (object, function)
                    }
                    Expression::Index {
                        object,
                        index,
                        optional: index_optional,
                    } => {
                        let Some(object) = self.evaluate_chain(object, scope)? else {
                            return Ok(None);
                        };
                        if *index_optional && object.is_nullish() {
                            return Ok(None);
                        }
                        let key = property_key(&self.evaluate(index, scope)?);
                        self.offset = callee.span.start;
                        let function = self.get_property(&object, &key)?;
                        (object, function)
                    }
                    _ => {
                        let Some(function) = self.evaluate_chain(callee, scope)? else {
                            return Ok(None);
                        };
                        (Value::Undefined, function)
                    }
                };
                if *optional && function.is_nullish() {
                    return Ok(None);
                }
                let arguments = self.evaluate_elements(arguments, scope)?;
                self.offset = expression.span.start;
                if !matches!(function, Value::Function(_)) {
                    let callee_text = self.source_text(callee.span).to_string();
                    return Err(self.type_error(format!("{callee_text} is not a function")));
                }
                self.call_function(&function, this, arguments).map(Some)
            }
            _ => self.evaluate(expression, scope).map(Some),
        }
    }

    fn evaluate_elements(
        &mut self,
        elements: &[Element],
        scope: &Scope,
    ) -> Result<Vec<Value>, Exception> {
        let mut values = Vec::with_capacity(elements.len());
        for element in elements {
            match element {
                Element::Expression(expression) => values.push(self.evaluate(expression, scope)?),
                Element::Spread(expression) => {
                    let spread = self.evaluate(expression, scope)?;
                    values.extend(self.iterate(&spread)?);
                }
            }
        }
        Ok(values)
    }

    fn evaluate_object(
        &mut self,
        members: &[ObjectMember],
        scope: &Scope,
    ) -> Result<Value, Exception> {
        let object = ObjectRef::default();
        for member in members {
            match member {
                ObjectMember::Property { key, value } => {
                    let value = self.evaluate_named(value, scope, key)?;
                    object.set(key.clone(), value);
                }
                ObjectMember::Computed { key, value } => {
                    let key = property_key(&self.evaluate(key, scope)?);
                    let value = self.evaluate_named(value, scope, &key)?;
                    object.set(key, value);
                }
                ObjectMember::Spread(expression) => {
                    let spread = self.evaluate(expression, scope)?;
                    for (key, value) in own_entries(&spread) {
                        object.set(key, value);
                    }
                }
            }
        }
        Ok(Value::Object(Rc::new(object)))
    }

    fn assign_to(
        &mut self,
        target: &Spanned<Expression>,
        value: Value,
        scope: &Scope,
    ) -> Result<(), Exception> {
        match &target.node {
            Expression::Identifier(name) => self.assign_variable(name, value, scope),
            Expression::Member { object, property, .. } => {
                let object = self.evaluate(object, scope)?;
                self.set_property(&object, property, value)
            }
            Expression::Index { object, index, .. } => {
                let object = self.evaluate(object, scope)?;
                let key = property_key(&self.evaluate(index, scope)?);
                self.set_property(&object, &key, value)
            }
            other => match expression_to_pattern(other) {
                Some(pattern) => self.bind_pattern(&pattern, value, scope, BindMode::Assign),
                None => Err(self.throw_error("SyntaxError", "Invalid left-hand side in assignment")),
            },
        }
    }

    fn binary(
        &mut self,
        operator: BinaryOperator,
        left: Value,
        right: Value,
    ) -> Result<Value, Exception> {
        let value = match operator {
            BinaryOperator::Add => {
                if is_string_like(&left) || is_string_like(&right) {
                    Value::string(format!("{}{}", left.to_js_string(), right.to_js_string()))
                } else {
                    Value::Number(left.to_number() + right.to_number())
                }
            }
            BinaryOperator::Subtract => Value::Number(left.to_number() - right.to_number()),
            BinaryOperator::Multiply => Value::Number(left.to_number() * right.to_number()),
            BinaryOperator::Divide => Value::Number(left.to_number() / right.to_number()),
            BinaryOperator::Remainder => Value::Number(left.to_number() % right.to_number()),
            BinaryOperator::Power => Value::Number(left.to_number().powf(right.to_number())),
            BinaryOperator::Equal => Value::Boolean(left.loose_equals(&right)),
            BinaryOperator::NotEqual => Value::Boolean(!left.loose_equals(&right)),
            BinaryOperator::StrictEqual => Value::Boolean(left.strict_equals(&right)),
            BinaryOperator::StrictNotEqual => Value::Boolean(!left.strict_equals(&right)),
            BinaryOperator::Less
            | BinaryOperator::LessOrEqual
            | BinaryOperator::Greater
            | BinaryOperator::GreaterOrEqual => Value::Boolean(compare(operator, &left, &right)),
            BinaryOperator::In => {
                let key = property_key(&left);
                let found = match &right {
                    Value::Object(object) => object.contains_key(&key),
                    Value::Array(array) => {
                        key == "length"
                            || key.parse::<usize>().is_ok_and(|index| index < array.len())
                    }
                    Value::Namespace(namespace) => namespace.exports.contains_key(&key),
                    Value::Function(function) => function.properties.contains_key(&key),
                    _ => {
                        return Err(self.type_error(format!(
                            "Cannot use 'in' operator to search for '{key}' in {}",
                            right.to_js_string()
                        )));
                    }
                };
                Value::Boolean(found)
            }
        };
        Ok(value)
    }

    // Calls

    pub fn call_function(
        &mut self,
        function: &Value,
        this: Value,
        arguments: Vec<Value>,
    ) -> Result<Value, Exception> {
        let Value::Function(function) = function else {
            return Err(self.type_error(format!("{} is not a function", function.to_js_string())));
        };
        self.tick()?;
        let caller_offset = self.offset;
        let result = match &function.kind {
            FunctionKind::Native(native) => native(self, this, arguments),
            FunctionKind::Closure {
                definition, scope, ..
            } => {
                if self.frames.len() >= self.limits.max_call_depth {
                    return Err(self.throw_error("RangeError", "Maximum call stack size exceeded"));
                }
                let name = if function.name.is_empty() {
                    "<anonymous>".to_string()
                } else {
                    function.name.clone()
                };
                self.frames.push(Frame {
                    name,
                    call_offset: caller_offset,
                });
                let result = self.call_closure(definition, scope, this, arguments);
                self.frames.pop();
                result
            }
        };
        self.offset = caller_offset;
        result
    }

    fn call_closure(
        &mut self,
        definition: &Rc<FunctionDefinition>,
        captured: &Scope,
        this: Value,
        arguments: Vec<Value>,
    ) -> Result<Value, Exception> {
        let scope = captured.child();
        if !definition.is_arrow {
            scope.declare("this", this, false);
        }
        let result = self
            .bind_parameters(&definition.parameters, arguments, &scope)
            .and_then(|()| match &definition.body {
                FunctionBody::Block(statements) => match self.execute_block(statements, &scope)? {
                    Flow::Return(value) => Ok(value),
                    _ => Ok(Value::Undefined),
                },
                FunctionBody::Expression(expression) => self.evaluate(expression, &scope),
            });
        if !definition.is_async {
            return result;
        }
        match result {
            Ok(promise @ Value::Promise(_)) => Ok(promise),
            Ok(value) => Ok(Value::resolved(value)),
            Err(exception) if exception.is_catchable() => Ok(Value::rejected(exception)),
            Err(exception) => Err(exception),
        }
    }

    fn construct(
        &mut self,
        constructor: &Value,
        arguments: Vec<Value>,
        callee_span: Span,
    ) -> Result<Value, Exception> {
        let Value::Function(function) = constructor else {
            let callee_text = self.source_text(callee_span).to_string();
            return Err(self.type_error(format!("{callee_text} is not a constructor")));
        };
        match &function.kind {
            FunctionKind::Native(_) => self.call_function(constructor, Value::Undefined, arguments),
            FunctionKind::Closure { definition, .. } if definition.is_arrow => {
                let callee_text = self.source_text(callee_span).to_string();
                Err(self.type_error(format!("{callee_text} is not a constructor")))
            }
            FunctionKind::Closure { .. } => {
                let instance = Value::Object(Rc::new(ObjectRef::default()));
                let result = self.call_function(constructor, instance.clone(), arguments)?;
                Ok(match result {
                    Value::Object(_) | Value::Array(_) | Value::Function(_) => result,
                    _ => instance,
                })
            }
        }
    }

    /// Unwraps settled promises and thenables.
    pub fn await_value(&mut self, value: Value) -> Result<Value, Exception> {
        match &value {
            Value::Promise(promise) => {
                let outcome = match &*promise.state.borrow() {
                    PromiseState::Fulfilled(value) => Ok(value.clone()),
                    PromiseState::Rejected(exception) => Err(exception.clone()),
                    PromiseState::Pending => Err(Exception::Interrupted(
                        "Awaited a promise that can never settle".to_string(),
                    )),
                };
                outcome
            }
            Value::Object(object) => {
                let then = object.get_own(THEN_PROBE);
                let Some(then @ Value::Function(_)) = then else {
                    return Ok(value);
                };
                let promise = Rc::new(Promise::pending());
                let (resolve, reject) = builtins::resolving_functions(&promise);
                if let Err(exception) = self.call_function(&then, value.clone(), vec![resolve, reject]) {
                    if !exception.is_catchable() {
                        return Err(exception);
                    }
                    promise.settle(PromiseState::Rejected(exception));
                }
                self.await_value(Value::Promise(promise))
            }
            _ => Ok(value),
        }
    }

    // Properties

    pub fn get_property(&mut self, object: &Value, key: &str) -> Result<Value, Exception> {
        let prototypes = self.prototypes.clone();
        let value = match object {
            Value::Undefined | Value::Null => {
                return Err(self.type_error(format!(
                    "Cannot read properties of {} (reading '{key}')",
                    object.to_js_string()
                )));
            }
            Value::Object(properties) => properties
                .get_own(key)
                .or_else(|| prototypes.object.get(key).cloned()),
            Value::Array(array) => match key {
                "length" => Some(Value::Number(array.len() as f64)),
                _ => match array_index(key) {
                    Some(index) => Some(array.get(index)),
                    None => prototypes.array.get(key).cloned(),
                },
            },
            Value::String(text) => match key {
                "length" => Some(Value::Number(text.chars().count() as f64)),
                _ => match array_index(key) {
                    Some(index) => text.chars().nth(index).map(|character| Value::string(character.to_string())),
                    None => prototypes.string.get(key).cloned(),
                },
            },
            Value::Number(_) => prototypes.number.get(key).cloned(),
            Value::Boolean(_) => prototypes.object.get(key).cloned(),
            Value::Function(function) => match key {
                "name" => Some(Value::string(&function.name)),
                _ => function
                    .properties
                    .get_own(key)
                    .or_else(|| prototypes.function.get(key).cloned()),
            },
            Value::Namespace(namespace) => Some(namespace.get(key)?),
            Value::Promise(_) => prototypes.promise.get(key).cloned(),
        };
        Ok(value.unwrap_or(Value::Undefined))
    }

    pub fn set_property(&mut self, object: &Value, key: &str, value: Value) -> Result<(), Exception> {
        match object {
            Value::Undefined | Value::Null => Err(self.type_error(format!(
                "Cannot set properties of {} (setting '{key}')",
                object.to_js_string()
            ))),
            Value::Object(properties) => {
                if properties.set(key, value) {
                    Ok(())
                } else {
                    Err(self.type_error(format!(
                        "Cannot assign to read only property '{key}' of object"
                    )))
                }
            }
            Value::Array(array) => {
                if array.is_frozen() {
                    return Err(self.type_error(format!(
                        "Cannot assign to read only property '{key}' of object"
                    )));
                }
                let mut items = array.items.borrow_mut();
                if key == "length" {
                    let length = value.to_number();
                    if length < 0.0 || length.fract() != 0.0 {
                        drop(items);
                        return Err(self.throw_error("RangeError", "Invalid array length"));
                    }
                    items.resize(length as usize, Value::Undefined);
                } else if let Some(index) = array_index(key) {
                    if index >= items.len() {
                        items.resize(index + 1, Value::Undefined);
                    }
                    items[index] = value;
                }
                Ok(())
            }
            Value::Function(function) => {
                function.properties.set(key, value);
                Ok(())
            }
            Value::Namespace(namespace) => Err(self.type_error(format!(
                "Cannot assign to read only property '{key}' of module '{}'",
                namespace.module
            ))),
            _ => Ok(()),
        }
    }

    /// Values produced by `for ... of`, spread and array destructuring.
    pub fn iterate(&mut self, value: &Value) -> Result<Vec<Value>, Exception> {
        match value {
            Value::Array(array) => Ok(array.items.borrow().clone()),
            Value::String(text) => Ok(text
                .chars()
                .map(|character| Value::string(character.to_string()))
                .collect()),
            _ => Err(self.type_error(format!("{} is not iterable", value.to_js_string()))),
        }
    }
}

/// Enumerable own properties in insertion order.
pub fn own_entries(value: &Value) -> Vec<(String, Value)> {
    match value {
        Value::Object(object) => object.entries(),
        Value::Array(array) => array
            .items
            .borrow()
            .iter()
            .enumerate()
            .map(|(index, item)| (index.to_string(), item.clone()))
            .collect(),
        Value::String(text) => text
            .chars()
            .enumerate()
            .map(|(index, character)| (index.to_string(), Value::string(character.to_string())))
            .collect(),
        Value::Namespace(namespace) => namespace.exports.entries(),
        Value::Function(function) => function.properties.entries(),
        _ => Vec::new(),
    }
}

pub fn property_key(value: &Value) -> String {
    value.to_js_string()
}

fn array_index(key: &str) -> Option<usize> {
    let index = key.parse::<usize>().ok()?;
    (index.to_string() == key).then_some(index)
}

fn is_string_like(value: &Value) -> bool {
    !matches!(
        value,
        Value::Undefined | Value::Null | Value::Boolean(_) | Value::Number(_)
    )
}

fn compare(operator: BinaryOperator, left: &Value, right: &Value) -> bool {
    let ordering = match (left, right) {
        (Value::String(left), Value::String(right)) => Some(left.cmp(right)),
        _ => left.to_number().partial_cmp(&right.to_number()),
    };
    let Some(ordering) = ordering else {
        return false;
    };
    match operator {
        BinaryOperator::Less => ordering.is_lt(),
        BinaryOperator::LessOrEqual => ordering.is_le(),
        BinaryOperator::Greater => ordering.is_gt(),
        _ => ordering.is_ge(),
    }
}

fn compound_operator(operator: AssignOperator) -> BinaryOperator {
    match operator {
        AssignOperator::Subtract => BinaryOperator::Subtract,
        AssignOperator::Multiply => BinaryOperator::Multiply,
        AssignOperator::Divide => BinaryOperator::Divide,
        AssignOperator::Remainder => BinaryOperator::Remainder,
        AssignOperator::Add => BinaryOperator::Add,
        AssignOperator::Assign | AssignOperator::Nullish => {
            unreachable!("plain and nullish assignment are not compound")
        }
    }
}

/// Reinterprets an array or object literal on the left of `=` as a pattern.
fn expression_to_pattern(expression: &Expression) -> Option<Pattern> {
    match expression {
        Expression::Identifier(name) => Some(Pattern::Identifier(name.clone())),
        Expression::Array(elements) => {
            let mut pattern_elements = Vec::new();
            let mut rest = None;
            for element in elements {
                match element {
                    Element::Expression(expression) => {
                        pattern_elements.push(expression_to_element(&expression.node)?)
                    }
                    Element::Spread(expression) => {
                        rest = Some(Box::new(expression_to_pattern(&expression.node)?))
                    }
                }
            }
            Some(Pattern::Array {
                elements: pattern_elements,
                rest,
            })
        }
        Expression::Object(members) => {
            let mut properties = Vec::new();
            let mut rest = None;
            for member in members {
                match member {
                    ObjectMember::Property { key, value } => {
                        let PatternElement { pattern, default } = expression_to_element(&value.node)?;
                        properties.push(PatternProperty {
                            key: key.clone(),
                            value: pattern,
                            default,
                        });
                    }
                    ObjectMember::Spread(Spanned {
                        node: Expression::Identifier(name),
                        ..
                    }) => rest = Some(name.clone()),
                    _ => return None,
                }
            }
            Some(Pattern::Object { properties, rest })
        }
        _ => None,
    }
}

fn expression_to_element(expression: &Expression) -> Option<PatternElement> {
    match expression {
        Expression::Assign {
            operator: AssignOperator::Assign,
            target,
            value,
        } => Some(PatternElement {
            pattern: expression_to_pattern(&target.node)?,
            default: Some((**value).clone()),
        }),
        other => Some(PatternElement {
            pattern: expression_to_pattern(other)?,
            default: None,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;

    fn run(code: &str) -> Result<Value, Exception> {
        run_with_limits(code, Limits::default())
    }

    fn run_with_limits(code: &str, limits: Limits) -> Result<Value, Exception> {
        let source = SourceCode::new(format!("let __result;\n{code}"));
        let program = parse_program(source.as_str()).expect("test program should parse");
        let mut interpreter = Interpreter::new(source, limits);
        interpreter.run_program(&program)?;
        let result = interpreter.globals().lookup("__result").unwrap_or(Value::Undefined);
        interpreter.release();
        Ok(result)
    }

    fn number(code: &str) -> f64 {
        match run(code) {
            Ok(Value::Number(number)) => number,
            other => panic!("Expected number from {code:?}, got {other:?}"),
        }
    }

    fn text(code: &str) -> String {
        match run(code) {
            Ok(Value::String(text)) => text.to_string(),
            other => panic!("Expected string from {code:?}, got {other:?}"),
        }
    }

    fn thrown_message(code: &str) -> String {
        match run(code) {
            Err(exception) => exception.message(),
            Ok(value) => panic!("Expected {code:?} to throw, got {value:?}"),
        }
    }

    #[test]
    fn test_arithmetic_and_strings() {
        assert_eq!(number("__result = 1 + 2 * 3 - 4 / 2;"), 5.0);
        assert_eq!(number("__result = 2 ** 3 ** 2;"), 512.0);
        assert_eq!(number("__result = -7 % 3;"), -1.0);
        assert_eq!(text("__result = 'a' + 1 + 2;"), "a12");
        assert_eq!(text("const n = 3; __result = `n=${n + 1}!`;"), "n=4!");
    }

    #[test]
    fn test_hoisted_functions_and_closures() {
        let code = "
            __result = twice(counter())();
            function twice(f) { return () => f() * 2; }
            function counter() { let n = 0; return () => { n += 1; return n; }; }
        ";
        assert_eq!(number(code), 2.0);
    }

    #[test]
    fn test_destructuring_and_defaults() {
        let code = "
            const { a, b: [first, ...others], c = 10, ...rest } = { a: 1, b: [2, 3, 4], d: 5 };
            let x = 1, y = 2;
            [x, y] = [y, x];
            __result = a + first + others.length + c + rest.d + x * 100;
        ";
        assert_eq!(number(code), 1.0 + 2.0 + 2.0 + 10.0 + 5.0 + 200.0);
    }

    #[test]
    fn test_loops_and_control_flow() {
        let code = "
            let total = 0;
            for (let i = 0; i < 10; i++) { if (i % 2) continue; if (i > 6) break; total += i; }
            for (const value of [1, 2]) total += value;
            for (const key in { x: 1, y: 2 }) total += key.length;
            let n = 0; while (true) { n++; if (n === 3) break; }
            __result = total + n;
        ";
        assert_eq!(number(code), 12.0 + 3.0 + 2.0 + 3.0);
    }

    #[test]
    fn test_try_catch_finally() {
        let code = "
            const log = [];
            try { null.x; } catch (error) { log.push(error.name); } finally { log.push('finally'); }
            try { throw new RangeError('bad'); } catch ({ message }) { log.push(message); }
            __result = log.join(',');
        ";
        assert_eq!(text(code), "TypeError,finally,bad");
    }

    #[test]
    fn test_optional_chaining_short_circuits() {
        assert_eq!(
            text("const o = { a: null }; __result = String(o.a?.b.c) + String(o.f?.());"),
            "undefinedundefined"
        );
    }

    #[test]
    fn test_async_functions_return_settled_promises() {
        let code = "
            async function load() { return 21; }
            async function fail() { throw new Error('nope'); }
            let caught;
            try { await fail(); } catch (error) { caught = error.message; }
            __result = (await load()) * 2 + caught.length;
        ";
        assert_eq!(number(code), 46.0);
    }

    #[test]
    fn test_frozen_objects_reject_writes() {
        assert_eq!(
            thrown_message("const o = Object.freeze({ a: 1 }); o.a = 2;"),
            "TypeError: Cannot assign to read only property 'a' of object"
        );
        assert_eq!(
            thrown_message("const c = 1; c = 2;"),
            "TypeError: Assignment to constant variable."
        );
    }

    #[test]
    fn test_reference_and_type_errors() {
        assert_eq!(thrown_message("missing + 1"), "ReferenceError: missing is not defined");
        assert_eq!(thrown_message("const o = {}; o.run();"), "TypeError: o.run is not a function");
        assert_eq!(
            thrown_message("undefined.x"),
            "TypeError: Cannot read properties of undefined (reading 'x')"
        );
        assert_eq!(number("__result = typeof notDeclared === 'undefined' ? 1 : 0;"), 1.0);
    }

    #[test]
    fn test_error_stack_has_frames() {
        let code = "
            function inner() { throw new Error('deep'); }
            function outer() { inner(); }
            try { outer(); } catch (error) { __result = error.stack; }
        ";
        let stack = text(code);
        assert!(stack.starts_with("Error: deep\n    at inner (<anonymous>:3:"), "{stack}");
        assert!(stack.contains("at outer (<anonymous>:4:"), "{stack}");
    }

    #[test]
    fn test_call_depth_limit_is_catchable() {
        let code = "
            function recurse() { return recurse(); }
            try { recurse(); } catch (error) { __result = error.message; }
        ";
        let limits = Limits {
            max_call_depth: 32,
            ..Limits::default()
        };
        match run_with_limits(code, limits) {
            Ok(Value::String(message)) => assert_eq!(&*message, "Maximum call stack size exceeded"),
            other => panic!("Expected RangeError message, got {other:?}"),
        }
    }

    #[test]
    fn test_eval_depth_limit_is_catchable() {
        let code = "
            function recurse(n) { return 1 + (n > 0 ? recurse(n - 1) : 0); }
            try { recurse(50); } catch (error) { __result = error.name + ': ' + error.message; }
        ";
        let limits = Limits {
            max_eval_depth: 64,
            ..Limits::default()
        };
        match run_with_limits(code, limits) {
            Ok(Value::String(message)) => assert_eq!(&*message, "RangeError: Maximum evaluation depth exceeded"),
            other => panic!("Expected RangeError message, got {other:?}"),
        }
        assert_eq!(number("function f(n) { return n > 0 ? 1 + f(n - 1) : 0; }\n__result = f(50);"), 50.0);
    }

    #[test]
    fn test_step_budget_interrupts() {
        let limits = Limits {
            max_steps: 1_000,
            ..Limits::default()
        };
        let result = run_with_limits("try { while (true) {} } catch (e) { __result = 1; }", limits);
        assert!(matches!(result, Err(Exception::Interrupted(_))));
    }

    #[test]
    fn test_new_with_closure_constructor() {
        let code = "
            function Point(x, y) { this.x = x; this.y = y; }
            const p = new Point(1, 2);
            __result = p.x + p.y;
        ";
        assert_eq!(number(code), 3.0);
    }

    #[test]
    fn test_function_to_string_is_source_text() {
        assert_eq!(
            text("function f(a) { return a; }\n__result = String(f);"),
            "function f(a) { return a; }"
        );
    }
}
