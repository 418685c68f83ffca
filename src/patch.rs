//! Replaces one method of one class: the old body is kept under a new name and a freshly
//! compiled method takes over the original name and descriptor.

use crate::class::opcodes::{check_constant_operands, invoked_methods};
use crate::class::{ClassError, ClassFile};
use crate::classpath::Resolver;
use crate::error::PatchError;
use crate::synth;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

/// What to patch and what to replace it with.
///
/// Class names are internal names (`io/flutter/view/AccessibilityBridge`); imports use the
/// dotted source form and may name a class or a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchSpec {
    /// Only archives whose name starts with this are patched.
    pub archive_prefix: String,
    pub class_name: String,
    pub method_name: String,
    pub method_descriptor: String,
    /// Appended to the original method's name to keep it callable from the new body.
    pub rename_suffix: String,
    #[serde(default)]
    pub imports: Vec<String>,
    /// Full source of the replacement method.
    pub source: String,
}

const ACCESSIBILITY_TEMPLATE: &str = r#"public AccessibilityNodeInfo createAccessibilityNodeInfo(int virtualViewId) {
    final AccessibilityNodeInfo result = createAccessibilityNodeInfo_original(virtualViewId);

    if (Build.MANUFACTURER.contains("@MANUFACTURER@")) {
        if (flutterSemanticsTree.containsKey(Integer.valueOf(virtualViewId))) {
            final Object semanticsNode = flutterSemanticsTree.get(Integer.valueOf(virtualViewId));

            if (semanticsNode != null) {
                final CharSequence value = (CharSequence) readField(semanticsNode, "value");

                if (value != null && value.length() > 0) {
                    Log.d("AccessibilityBridge", "Semantics value injection: " + value.toString());
                    result.setContentDescription(value);
                }
            }
        }
    }

    return result;
}
"#;

impl PatchSpec {
    /// The Flutter embedding patch: on devices whose manufacturer string contains
    /// `manufacturer`, a semantics node's value becomes the content description of the
    /// accessibility node built for it.
    pub fn flutter_accessibility(manufacturer: &str) -> PatchSpec {
        PatchSpec {
            archive_prefix: "io.flutter:flutter_embedding".to_string(),
            class_name: "io/flutter/view/AccessibilityBridge".to_string(),
            method_name: "createAccessibilityNodeInfo".to_string(),
            method_descriptor: "(I)Landroid/view/accessibility/AccessibilityNodeInfo;".to_string(),
            rename_suffix: "_original".to_string(),
            imports: vec![
                "android.os.Build".to_string(),
                "android.util.Log".to_string(),
                "android.view.accessibility.AccessibilityNodeInfo".to_string(),
            ],
            source: ACCESSIBILITY_TEMPLATE.replace("@MANUFACTURER@", &java_string_escape(manufacturer)),
        }
    }

    /// Name of the archive entry holding the target class.
    pub fn entry_name(&self) -> String {
        format!("{}.class", self.class_name)
    }

    pub fn renamed_method(&self) -> String {
        format!("{}{}", self.method_name, self.rename_suffix)
    }

    pub fn applies_to(&self, archive_name: &str) -> bool {
        archive_name.starts_with(&self.archive_prefix)
    }
}

/// Escapes text for use inside a Java string literal.
fn java_string_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

fn simple_name(internal: &str) -> &str {
    internal.rsplit('/').next().unwrap_or(internal)
}

/// Patches the class file `bytes` as `spec` describes and returns the new class file.
///
/// The class is registered with `resolver` after the rename, so the replacement body sees
/// the renamed method. Patching an already patched class fails with
/// [`PatchError::DuplicateMethod`].
pub fn patch_class(bytes: &[u8], spec: &PatchSpec, resolver: &mut Resolver) -> Result<Vec<u8>, PatchError> {
    let mut class = ClassFile::decode(bytes)?;
    let class_name = class.name()?.to_string();
    if class_name != spec.class_name {
        return Err(ClassError::invalid(&format!("expected class {}, found {}", spec.class_name, class_name)).into());
    }
    let descriptor = spec.method_descriptor.as_str();

    let index = class.find_method(&spec.method_name, descriptor)?.ok_or_else(|| PatchError::MethodNotFound {
        class: class_name.clone(),
        name: spec.method_name.clone(),
        descriptor: descriptor.to_string(),
    })?;
    let renamed = spec.renamed_method();
    if class.find_method(&renamed, descriptor)?.is_some() {
        return Err(PatchError::DuplicateMethod { class: class_name, name: renamed, descriptor: descriptor.to_string() });
    }

    info!("Replacing {}#{}", simple_name(&class_name), spec.method_name);
    class.rename_method(index, &renamed)?;
    resolver.define(&class)?;

    let method = synth::compile(&spec.source, &mut class, resolver, &spec.imports)?;
    let name = class.method_name(&method)?.to_string();
    let synthesized = class.method_descriptor(&method)?.to_string();
    if name != spec.method_name || synthesized != descriptor {
        let line = spec.source.lines().position(|l| !l.trim().is_empty()).map_or(1, |i| i + 1);
        return Err(PatchError::TypeResolution {
            line,
            message: format!(
                "synthesized method {}{} does not replace {}{}",
                name, synthesized, spec.method_name, descriptor
            ),
        });
    }
    if class.find_method(&name, &synthesized)?.is_some() {
        return Err(PatchError::DuplicateMethod { class: class_name, name, descriptor: synthesized });
    }

    if let Some(code) = method.code() {
        check_constant_operands(&code.code, &class.constant_pool)?;
        let calls = invoked_methods(&code.code, &class.constant_pool)?;
        if !calls.iter().any(|(owner, n, d)| *owner == class_name && *n == renamed && d == descriptor) {
            warn!("{}#{} never calls {}", simple_name(&class_name), name, renamed);
        }
        debug!("{}#{}: {} bytes of code, {} calls", simple_name(&class_name), name, code.code.len(), calls.len());
    }

    class.add_method(method)?;
    info!("Generating bytecode for {}", simple_name(&class_name));
    Ok(class.encode()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flutter_spec_names() {
        let spec = PatchSpec::flutter_accessibility("RealWear");
        assert_eq!(spec.entry_name(), "io/flutter/view/AccessibilityBridge.class");
        assert_eq!(spec.renamed_method(), "createAccessibilityNodeInfo_original");
        assert!(spec.applies_to("io.flutter:flutter_embedding_debug:1.0.0"));
        assert!(!spec.applies_to("androidx.core:core:1.6.0"));
        assert!(spec.source.contains("Build.MANUFACTURER.contains(\"RealWear\")"));
    }

    #[test]
    fn manufacturer_is_escaped() {
        let spec = PatchSpec::flutter_accessibility("A \"quoted\" \\ name");
        assert!(spec.source.contains(r#"contains("A \"quoted\" \\ name")"#));
        assert_eq!(java_string_escape("\u{1}"), "\\u0001");
    }
}
