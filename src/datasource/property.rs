use super::*;
use arc_swap::{ArcSwap, ArcSwapOption};

/// PropertyConverter func is to convert source message string to the specific property, that is, the sentinel rules.
/// if succeed to convert src, return Ok(Property)
/// if not, return the detailed error when convert src.
pub type PropertyConverter<P> = fn(src: &str) -> Result<Vec<Arc<P>>>;

/// `rule_json_array_parser` provide JSON as the default serialization for list of rules
pub fn rule_json_array_parser<P: SentinelRule + DeserializeOwned>(
    src: &str,
) -> Result<Vec<Arc<P>>> {
    if src.trim().is_empty() {
        return Ok(Vec::new());
    }
    let rules: Vec<P> = serde_json::from_str(src)?;
    Ok(rules.into_iter().map(Arc::new).collect())
}

/// `rule_yaml_array_parser` parses a YAML sequence of rules
pub fn rule_yaml_array_parser<P: SentinelRule + DeserializeOwned>(
    src: &str,
) -> Result<Vec<Arc<P>>> {
    if src.trim().is_empty() {
        return Ok(Vec::new());
    }
    let rules: Vec<P> = serde_yaml::from_str(src)?;
    Ok(rules.into_iter().map(Arc::new).collect())
}

/// Receives the values published by a [`DynamicProperty`].
/// Returned `bool` indicates whether the listener changed anything.
pub trait PropertyListener<T>: Send + Sync {
    /// `config_update` is triggered when the value of the property changes.
    fn config_update(&self, value: &T) -> Result<bool>;
    /// `config_load` is triggered when the listener is registered on a property that already holds a value.
    fn config_load(&self, value: &T) -> Result<bool>;
}

/// A value that can be pushed at runtime and fanned out to listeners.
/// Listeners are notified from the thread calling `update_value`.
pub struct DynamicProperty<T> {
    value: ArcSwapOption<T>,
    listeners: ArcSwap<Vec<Arc<dyn PropertyListener<T>>>>,
}

impl<T> Default for DynamicProperty<T> {
    fn default() -> Self {
        DynamicProperty {
            value: ArcSwapOption::empty(),
            listeners: ArcSwap::from_pointee(Vec::new()),
        }
    }
}

impl<T> std::fmt::Debug for DynamicProperty<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicProperty")
            .field("has_value", &self.value.load().is_some())
            .field("listeners", &self.listeners.load().len())
            .finish()
    }
}

fn same_listener<T>(a: &Arc<dyn PropertyListener<T>>, b: &Arc<dyn PropertyListener<T>>) -> bool {
    Arc::as_ptr(a) as *const u8 == Arc::as_ptr(b) as *const u8
}

impl<T: PartialEq + Send + Sync> DynamicProperty<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(value: T) -> Self {
        DynamicProperty {
            value: ArcSwapOption::from_pointee(value),
            listeners: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn value(&self) -> Option<Arc<T>> {
        self.value.load_full()
    }

    /// Registers the listener and loads the current value into it, if there is one.
    pub fn add_listener(&self, listener: Arc<dyn PropertyListener<T>>) {
        self.listeners.rcu(|listeners| {
            let mut next = Vec::clone(listeners);
            if !next.iter().any(|l| same_listener(l, &listener)) {
                next.push(Arc::clone(&listener));
            }
            next
        });
        if let Some(value) = self.value.load_full() {
            if let Err(err) = listener.config_load(&value) {
                logging::warn!(
                    "[DynamicProperty] Failed to load current value into a new listener, error {:?}",
                    err
                );
            }
        }
    }

    pub fn remove_listener(&self, listener: &Arc<dyn PropertyListener<T>>) {
        self.listeners.rcu(|listeners| {
            listeners
                .iter()
                .filter(|l| !same_listener(l, listener))
                .cloned()
                .collect::<Vec<_>>()
        });
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.load().len()
    }

    /// Publishes `value` to the listeners. Returns false if it equals the current value.
    pub fn update_value(&self, value: T) -> bool {
        let current = self.value.load();
        if let Some(current) = &*current {
            if **current == value {
                return false;
            }
        }
        drop(current);
        let value = Arc::new(value);
        self.value.store(Some(Arc::clone(&value)));
        for listener in self.listeners.load().iter() {
            if let Err(err) = listener.config_update(&value) {
                logging::warn!(
                    "[DynamicProperty] Listener failed to apply an update, error {:?}",
                    err
                );
            }
        }
        true
    }
}

pub trait PropertyHandler<P: SentinelRule>: Send + Sync {
    // check whether the current src is consistent with last update property
    fn is_property_consistent(&mut self, rules: &[Arc<P>]) -> bool;
    // handle the current property
    fn handle(&mut self, src: Option<&str>) -> Result<bool>;
}

/// DefaultPropertyHandler encapsulate the converter of a property and the property it publishes to.
/// One DefaultPropertyHandler instance is to handle one property type.
/// DefaultPropertyHandler should check whether current property is consistent with last update property.
pub struct DefaultPropertyHandler<P: SentinelRule + PartialEq + DeserializeOwned> {
    last_update_property: Option<Vec<Arc<P>>>,
    converter: PropertyConverter<P>,
    property: Arc<DynamicProperty<Vec<Arc<P>>>>,
}

impl<P: SentinelRule + PartialEq + DeserializeOwned> DefaultPropertyHandler<P> {
    pub fn new(converter: PropertyConverter<P>, property: Arc<DynamicProperty<Vec<Arc<P>>>>) -> Self {
        Self {
            converter,
            property,
            last_update_property: None,
        }
    }

    pub fn property(&self) -> &Arc<DynamicProperty<Vec<Arc<P>>>> {
        &self.property
    }
}

impl<P: SentinelRule + PartialEq + DeserializeOwned> PropertyHandler<P>
    for DefaultPropertyHandler<P>
{
    fn is_property_consistent(&mut self, rules: &[Arc<P>]) -> bool {
        if self.last_update_property.as_deref() == Some(rules) {
            true
        } else {
            self.last_update_property = Some(rules.to_vec());
            false
        }
    }

    /// `None` means the source was deleted, which publishes an empty rule set.
    fn handle(&mut self, src: Option<&str>) -> Result<bool> {
        let rules = match src {
            Some(src) => (self.converter)(src)
                .map_err(|err| Error::msg(format!("fail to convert source, {}", err)))?,
            None => Vec::new(),
        };
        if self.is_property_consistent(&rules) {
            return Ok(false);
        }
        Ok(self.property.update_value(rules))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::core::adaptive::Rule;
    use mockall::*;

    mock! {
        RuleListener {}
        impl PropertyListener<Vec<Arc<Rule>>> for RuleListener {
            fn config_update(&self, value: &Vec<Arc<Rule>>) -> Result<bool>;
            fn config_load(&self, value: &Vec<Arc<Rule>>) -> Result<bool>;
        }
    }

    const RULES_JSON: &str = r#"[
        {"resource": "GET:/svc/x", "enabled": true, "server_load_threshold": 80},
        {"resource": "GET:/svc/y"}
    ]"#;

    const RULES_YAML: &str = r#"
- resource: GET:/svc/x
  enabled: true
  server_load_threshold: 80
- resource: GET:/svc/y
"#;

    #[test]
    fn json_and_yaml_agree() {
        let from_json = rule_json_array_parser::<Rule>(RULES_JSON).unwrap();
        let from_yaml = rule_yaml_array_parser::<Rule>(RULES_YAML).unwrap();
        assert_eq!(from_json, from_yaml);
        assert_eq!(from_json.len(), 2);
        assert!(from_json[0].enabled);
        assert!(!from_json[1].enabled);
        assert!(rule_json_array_parser::<Rule>("  ").unwrap().is_empty());
        assert!(rule_json_array_parser::<Rule>("{").is_err());
    }

    #[test]
    fn add_listener_loads_current_value() {
        let property = DynamicProperty::with_value(rule_json_array_parser::<Rule>(RULES_JSON).unwrap());
        let mut listener = MockRuleListener::new();
        listener
            .expect_config_load()
            .withf(|rules| rules.len() == 2)
            .times(1)
            .returning(|_| Ok(true));
        listener.expect_config_update().never();
        property.add_listener(Arc::new(listener));
        assert_eq!(property.listener_count(), 1);
    }

    #[test]
    fn update_skips_equal_value() {
        let property = DynamicProperty::new();
        let mut listener = MockRuleListener::new();
        listener.expect_config_load().never();
        listener
            .expect_config_update()
            .times(2)
            .returning(|_| Ok(true));
        let listener: Arc<dyn PropertyListener<Vec<Arc<Rule>>>> = Arc::new(listener);
        property.add_listener(Arc::clone(&listener));
        // adding twice keeps one registration
        property.add_listener(Arc::clone(&listener));
        assert_eq!(property.listener_count(), 1);

        let rules = rule_json_array_parser::<Rule>(RULES_JSON).unwrap();
        assert!(property.update_value(rules.clone()));
        assert!(!property.update_value(rules));
        assert!(property.update_value(Vec::new()));

        property.remove_listener(&listener);
        assert_eq!(property.listener_count(), 0);
        assert!(property.update_value(rule_yaml_array_parser::<Rule>(RULES_YAML).unwrap()));
    }

    #[test]
    fn handler_publishes_changes_only() {
        let property = Arc::new(DynamicProperty::new());
        let mut handler = DefaultPropertyHandler::new(rule_json_array_parser::<Rule>, Arc::clone(&property));
        assert!(handler.handle(Some(RULES_JSON)).unwrap());
        assert!(!handler.handle(Some(RULES_JSON)).unwrap());
        assert_eq!(property.value().unwrap().len(), 2);
        assert!(handler.handle(Some("not json")).is_err());
        assert!(handler.handle(None).unwrap());
        assert!(property.value().unwrap().is_empty());
    }
}
