use crate::class::opcodes::*;
use crate::class::{AccessFlags, ClassFile, MethodInfo};
use crate::classpath::ResolveError;
use crate::synth::{compile, SynthError};
use crate::tests::fixtures::*;

/// `demo.Host`: the class the snippets below are compiled into.
fn host() -> ClassFile {
    Stub::class("demo/Host", "java/lang/Object")
        .field(AccessFlags::PRIVATE, "count", "I")
        .field(AccessFlags::PRIVATE, "total", "J")
        .field(AccessFlags::PRIVATE, "cache", "Ljava/util/Map;")
        .field(AccessFlags::STATIC, "NAME", "Ljava/lang/String;")
        .method(AccessFlags::PRIVATE, "secret", "()Ljava/lang/String;")
        .method(PUBLIC, "pick", "(Ljava/lang/String;)V")
        .method(PUBLIC, "pick", "(Ljava/lang/Integer;)V")
        .method(PUBLIC, "take", "(J)V")
        .build()
}

fn compile_with(source: &str, imports: &[&str]) -> Result<(ClassFile, MethodInfo), SynthError> {
    let mut class = host();
    let mut resolver = stub_resolver();
    let imports: Vec<String> = imports.iter().map(|s| s.to_string()).collect();
    let method = compile(source, &mut class, &mut resolver, &imports)?;
    Ok((class, method))
}

/// Compiles `source` and adds the result to the host class.
fn compiled(source: &str) -> ClassFile {
    let (mut class, method) = compile_with(source, &[]).unwrap();
    class.add_method(method).unwrap();
    class
}

fn opcodes(class: &ClassFile, name: &str, descriptor: &str) -> Vec<u8> {
    let index = class.find_method(name, descriptor).unwrap().unwrap();
    let code = &class.methods[index].code().unwrap().code;
    walk(code).unwrap().iter().map(|i| i.opcode).collect()
}

fn call(op: u8, owner: &str, name: &str, descriptor: &str) -> (u8, String, String, String) {
    (op, owner.to_string(), name.to_string(), descriptor.to_string())
}

fn type_error(source: &str) -> (usize, String) {
    match compile_with(source, &[]) {
        Err(SynthError::TypeResolution { line, message }) => (line, message),
        other => panic!("expected a type error, got {:?}", other.map(|_| ())),
    }
}

fn syntax_error(source: &str) -> (usize, String) {
    match compile_with(source, &[]) {
        Err(SynthError::Syntax { line, message }) => (line, message),
        other => panic!("expected a syntax error, got {:?}", other.map(|_| ())),
    }
}

fn unsupported(source: &str) -> (usize, String) {
    match compile_with(source, &[]) {
        Err(SynthError::Unsupported { line, construct }) => (line, construct),
        other => panic!("expected an unsupported construct, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn compiled_method_is_not_added() {
    let (class, method) = compile_with("public String a() { return secret(); }", &[]).unwrap();
    assert_eq!(class.methods.len(), host().methods.len());
    assert_eq!(class.method_name(&method).unwrap(), "a");
    assert_eq!(class.method_descriptor(&method).unwrap(), "()Ljava/lang/String;");
    assert_eq!(method.access_flags, AccessFlags::PUBLIC);
}

#[test]
fn private_methods_use_invokespecial() {
    let class = compiled("public String a() { return secret(); }");
    assert_eq!(
        calls(&class, "a", "()Ljava/lang/String;"),
        vec![call(INVOKESPECIAL, "demo/Host", "secret", "()Ljava/lang/String;")]
    );
}

#[test]
fn interface_receivers() {
    let class = compiled(
        "public int b() {
            if (cache.containsKey(\"k\")) {
                return cache.hashCode();
            }
            return 0;
        }",
    );
    assert_eq!(
        calls(&class, "b", "()I"),
        vec![
            call(INVOKEINTERFACE, "java/util/Map", "containsKey", "(Ljava/lang/Object;)Z"),
            call(INVOKEVIRTUAL, "java/lang/Object", "hashCode", "()I"),
        ]
    );
    let ops = opcodes(&class, "b", "()I");
    assert_eq!(ops.iter().filter(|&&op| op == GETFIELD).count(), 2);
}

#[test]
fn static_members() {
    let class = compiled("public static int c() { return Integer.valueOf(NAME).intValue(); }");
    assert_eq!(
        calls(&class, "c", "()I"),
        vec![
            call(INVOKESTATIC, "java/lang/Integer", "valueOf", "(Ljava/lang/String;)Ljava/lang/Integer;"),
            call(INVOKEVIRTUAL, "java/lang/Integer", "intValue", "()I"),
        ]
    );
    assert_eq!(opcodes(&class, "c", "()I")[0], GETSTATIC);
}

#[test]
fn string_concatenation() {
    let descriptor = "(IJZC)Ljava/lang/String;";
    let class = compiled("public String d(int n, long l, boolean z, char c) { return \"n=\" + n + l + z + c + this; }");
    let sb = "java/lang/StringBuilder";
    let append = |arg: &str| call(INVOKEVIRTUAL, sb, "append", &format!("({})Ljava/lang/StringBuilder;", arg));
    assert_eq!(
        calls(&class, "d", descriptor),
        vec![
            call(INVOKESPECIAL, sb, "<init>", "()V"),
            append("Ljava/lang/String;"),
            append("I"),
            append("J"),
            append("Z"),
            append("C"),
            append("Ljava/lang/Object;"),
            call(INVOKEVIRTUAL, sb, "toString", "()Ljava/lang/String;"),
        ]
    );
    assert_eq!(opcodes(&class, "d", descriptor)[0], NEW);
}

#[test]
fn mixed_width_comparisons_widen() {
    let class = compiled("public boolean e(int n) { return total > n; }");
    let ops = opcodes(&class, "e", "(I)Z");
    assert!(ops.contains(&I2L));
    assert!(ops.contains(&LCMP));

    let class = compiled("public void f(int n) { take(n); }");
    assert!(opcodes(&class, "f", "(I)V").contains(&I2L));
    assert_eq!(calls(&class, "f", "(I)V"), vec![call(INVOKEVIRTUAL, "demo/Host", "take", "(J)V")]);
}

#[test]
fn overload_resolution_errors() {
    let (line, message) = type_error("public void g() {\n    pick(null);\n}");
    assert_eq!(line, 2);
    assert_eq!(message, "reference to pick is ambiguous");

    let (_, message) = type_error("public void g() { pick(1); }");
    assert_eq!(message, "no suitable method found for pick(int)");

    let class = compiled("public void g() { pick(\"s\"); pick(Integer.valueOf(1)); }");
    assert_eq!(
        calls(&class, "g", "()V"),
        vec![
            call(INVOKEVIRTUAL, "demo/Host", "pick", "(Ljava/lang/String;)V"),
            call(INVOKESTATIC, "java/lang/Integer", "valueOf", "(I)Ljava/lang/Integer;"),
            call(INVOKEVIRTUAL, "demo/Host", "pick", "(Ljava/lang/Integer;)V"),
        ]
    );
}

#[test]
fn control_flow_errors() {
    assert_eq!(syntax_error("public int m() {\n}"), (2, "missing return statement".to_string()));
    assert_eq!(
        syntax_error("public int m() {\n    return 1;\n    return 2;\n}"),
        (3, "unreachable statement".to_string())
    );
    assert_eq!(
        syntax_error("public void m(boolean b) {\n    if (b) int x = 1;\n}").1,
        "variable declaration not allowed here"
    );
    assert_eq!(type_error("public void m() { return 1; }").1, "incompatible types: unexpected return value");
    assert_eq!(type_error("public int m() { return; }").1, "missing return value");
    assert!(matches!(compile_with("public void m() { int x = 1 }", &[]), Err(SynthError::Syntax { .. })));
}

#[test]
fn type_errors() {
    let (line, message) = type_error("public static int m() {\n    return count;\n}");
    assert_eq!(line, 2);
    assert!(message.starts_with("non-static variable count"), "{}", message);

    assert!(type_error("public void m() { Nope.call(); }").1.starts_with("cannot find symbol"));
    assert_eq!(
        type_error("public void m() { int x = 1; String x = \"a\"; }").1,
        "variable x is already defined in method"
    );
    assert_eq!(
        type_error("public void m() { if (count) { take(1); } }").1,
        "incompatible types: int cannot be converted to boolean"
    );
    assert_eq!(
        type_error("public boolean m(String s, Integer i) { return s == i; }").1,
        "incomparable types: java.lang.String and java.lang.Integer"
    );
    assert_eq!(
        type_error("public void m() { int v = readField(this, \"count\"); }").1,
        "incompatible types: Object cannot be converted to int"
    );
}

#[test]
fn unsupported_constructs() {
    assert_eq!(unsupported("public void m() {\n    for (;;) {}\n}"), (2, "for statement".to_string()));
    assert_eq!(unsupported("public String m() { return (String) count; }").1, "boxing conversion");
    assert_eq!(unsupported("public int m() { return (int) total; }").1, "narrowing primitive conversion");
    assert_eq!(
        unsupported("public void m() { pick((String) readField(this, \"name\")); }").1,
        "readField outside a local variable initializer"
    );
    assert_eq!(unsupported("public void m() { take(1.5); }").1, "floating point literal");
}

#[test]
fn missing_import_is_a_resolution_error() {
    let result = compile_with("public void m() { Gadget.poke(); }", &["android.os.Gadget"]);
    assert!(matches!(
        result,
        Err(SynthError::Resolve(ResolveError::NotFound(ref name))) if name == "android/os/Gadget"
    ));
}

#[test]
fn read_field_is_guarded() {
    let descriptor = "()Ljava/lang/CharSequence;";
    let class = compiled(
        "public CharSequence p() {
            final CharSequence v = (CharSequence) readField(cache, \"value\");
            return v;
        }",
    );
    let index = class.find_method("p", descriptor).unwrap().unwrap();
    let code = class.methods[index].code().unwrap();
    assert_eq!(&code.code[..3], &[ACONST_NULL, ASTORE, 1]);
    assert_eq!(code.exception_table.len(), 1);
    assert_eq!(class.constant_pool.class_name(code.exception_table[0].catch_type).unwrap(), "java/lang/Exception");

    let ops = opcodes(&class, "p", descriptor);
    assert!(ops.contains(&CHECKCAST));
    assert!(ops.contains(&POP));
    assert_eq!(
        calls(&class, "p", descriptor),
        vec![
            call(INVOKEVIRTUAL, "java/lang/Object", "getClass", "()Ljava/lang/Class;"),
            call(
                INVOKEVIRTUAL,
                "java/lang/Class",
                "getDeclaredField",
                "(Ljava/lang/String;)Ljava/lang/reflect/Field;"
            ),
            call(INVOKEVIRTUAL, "java/lang/reflect/Field", "setAccessible", "(Z)V"),
            call(INVOKEVIRTUAL, "java/lang/reflect/Field", "get", "(Ljava/lang/Object;)Ljava/lang/Object;"),
        ]
    );
}

#[test]
fn stack_maps_follow_the_class_version() {
    let source = "public String n(Object o) {
        if (o == null) {
            return \"none\";
        }
        return o.toString();
    }";
    let descriptor = "(Ljava/lang/Object;)Ljava/lang/String;";

    let class = compiled(source);
    let index = class.find_method("n", descriptor).unwrap().unwrap();
    let code = class.methods[index].code().unwrap();
    let names: Vec<&str> = code.attributes.iter().map(|a| a.name(&class.constant_pool).unwrap()).collect();
    assert_eq!(names, vec!["StackMapTable"]);
    assert!(opcodes(&class, "n", descriptor).contains(&IFNONNULL));

    let mut old = host();
    old.major_version = 49;
    let mut resolver = stub_resolver();
    let method = compile(source, &mut old, &mut resolver, &[]).unwrap();
    assert!(method.code().unwrap().attributes.is_empty());
}
