//! Merging abstract types
//!
//! Merging finds the most specific type that both inputs can be treated as. Interfaces are
//! treated as if they were `java/lang/Object` (the runtime checks interface calls fully), except
//! when checking whether a value is assignable to an interface type: anything that is an object
//! is assignable to an interface.

use super::types::{AbstractType, ClassId, ClassNames};
use crate::jvm::class_graph::ClassData;
use crate::jvm::{Name, RefType, VerifierErrorKind};

impl<'g> ClassNames<'g> {
    /// Merge `value` into `target`
    ///
    /// When `for_assignment` is set, the question being asked is really whether `target := value`
    /// is a legal assignment (see [`ClassNames::is_assignable`]).
    pub fn merge(
        &self,
        value: AbstractType,
        target: AbstractType,
        for_assignment: bool,
    ) -> Result<AbstractType, VerifierErrorKind> {
        if value == target {
            return Ok(value);
        }

        let (value_ref, target_ref) = match (value, target) {
            (AbstractType::Null, AbstractType::Reference(_)) => return Ok(target),
            (AbstractType::Reference(_), AbstractType::Null) => return Ok(value),
            (AbstractType::Reference(v), AbstractType::Reference(t)) => (v, t),
            _ => return Ok(AbstractType::Bogus),
        };

        if target == AbstractType::OBJECT {
            return Ok(target);
        } else if value == AbstractType::OBJECT {
            // `Interface := Object` keeps the interface so the assignment check succeeds
            if let (true, RefType::Object(target_class)) = (for_assignment, target_ref) {
                if self.resolve(target_class)?.is_interface() {
                    return Ok(target);
                }
            }
            return Ok(value);
        }

        let value_dims = value_ref.dimensions();
        let target_dims = target_ref.dimensions();
        if value_dims > 0 || target_dims > 0 {
            // Primitive arrays are promoted to arrays of objects with one fewer dimension
            let (value_dims, value_base) = match object_base(value_ref) {
                Some(base) => (value_dims, base),
                None => (value_dims - 1, ClassId::OBJECT),
            };
            let (target_dims, target_base) = match object_base(target_ref) {
                Some(base) => (target_dims, base),
                None => (target_dims - 1, ClassId::OBJECT),
            };

            return if value_dims == target_dims {
                let merged_base = self.merge(
                    AbstractType::class(value_base),
                    AbstractType::class(target_base),
                    for_assignment,
                )?;
                match merged_base {
                    AbstractType::Reference(RefType::Object(base)) if value_dims == 0 => {
                        Ok(AbstractType::class(base))
                    }
                    AbstractType::Reference(RefType::Object(base)) => {
                        Ok(AbstractType::Reference(RefType::ObjectArray(crate::jvm::ArrayType {
                            additional_dimensions: value_dims - 1,
                            element_type: base,
                        })))
                    }
                    _ => Ok(AbstractType::Bogus),
                }
            } else {
                Ok(AbstractType::object_array(value_dims.min(target_dims)))
            };
        }

        // Both are plain classes, neither of which is `java/lang/Object`
        let (value_class, target_class) = match (value_ref, target_ref) {
            (RefType::Object(v), RefType::Object(t)) => (v, t),
            _ => return Ok(AbstractType::Bogus),
        };
        let target_data = self.resolve(target_class)?;
        if target_data.is_interface() {
            return Ok(if for_assignment {
                target
            } else {
                AbstractType::OBJECT
            });
        }
        let value_data = self.resolve(value_class)?;
        if value_data.is_interface() {
            return Ok(AbstractType::OBJECT);
        }

        if for_assignment {
            let is_subclass = value_data
                .superclasses()
                .filter(|class| class.superclass.is_some())
                .any(|class| class.name == target_data.name);
            return Ok(if is_subclass {
                target
            } else {
                AbstractType::OBJECT
            });
        }

        let common = common_superclass(value_data, target_data);
        if common.name == value_data.name {
            Ok(value)
        } else if common.name == target_data.name {
            Ok(target)
        } else {
            Ok(AbstractType::class(self.intern(common.name.as_str())))
        }
    }

    /// Can a value of type `from` be stored where a `to` is expected?
    pub fn is_assignable(
        &self,
        from: AbstractType,
        to: AbstractType,
    ) -> Result<bool, VerifierErrorKind> {
        Ok(self.merge(from, to, true)? == to)
    }
}

/// Element class of an object array (or the class itself), `None` for primitive arrays
fn object_base(ref_type: RefType<ClassId>) -> Option<ClassId> {
    match ref_type {
        RefType::Object(class) => Some(class),
        RefType::ObjectArray(arr) => Some(arr.element_type),
        RefType::PrimitiveArray(_) => None,
    }
}

/// Deepest class which is a superclass of both classes
fn common_superclass<'a, 'g>(
    value: &'a ClassData<'g>,
    target: &'a ClassData<'g>,
) -> &'a ClassData<'g> {
    let value_depth = value.depth();
    let target_depth = target.depth();

    // Bring the deeper class up to the depth of the shallower one, then walk up in lockstep
    let mut values = value.superclasses().skip(value_depth.saturating_sub(target_depth));
    let mut targets = target.superclasses().skip(target_depth.saturating_sub(value_depth));
    loop {
        match (values.next(), targets.next()) {
            (Some(v), Some(t)) if v.name == t.name => return v,
            (Some(_), Some(_)) => continue,
            (Some(v), None) => return v,
            (None, _) => return target,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_graph::{ClassGraph, ClassGraphArenas};
    use crate::jvm::{BaseType, BinaryName, ClassAccessFlags};

    fn with_names(test: impl FnOnce(&ClassNames<'_>)) {
        let arenas = ClassGraphArenas::new();
        let class_graph = ClassGraph::new(&arenas);
        let java = class_graph.insert_java_library_types();
        let shape = class_graph.add_class(ClassData::new(
            BinaryName::from_string(String::from("me/Shape")).unwrap(),
            java.lang.object,
            ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
        ));
        shape.interfaces.push(java.lang.runnable);
        for name in ["me/Circle", "me/Square"] {
            class_graph.add_class(ClassData::new(
                BinaryName::from_string(String::from(name)).unwrap(),
                shape,
                ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            ));
        }
        let names = ClassNames::new(&class_graph);
        test(&names);
    }

    fn sample_types(names: &ClassNames<'_>) -> Vec<AbstractType> {
        vec![
            AbstractType::Bogus,
            AbstractType::Integer,
            AbstractType::Float,
            AbstractType::Long,
            AbstractType::Double,
            AbstractType::Null,
            AbstractType::OBJECT,
            AbstractType::STRING,
            AbstractType::THROWABLE,
            AbstractType::class(names.intern("me/Shape")),
            AbstractType::class(names.intern("me/Circle")),
            AbstractType::class(names.intern("me/Square")),
            AbstractType::class(names.intern("java/lang/NullPointerException")),
            AbstractType::class(names.intern("java/lang/ArithmeticException")),
            AbstractType::class(names.intern("java/lang/Runnable")),
            AbstractType::primitive_array(BaseType::Int, 1),
            AbstractType::primitive_array(BaseType::Byte, 2),
            AbstractType::object_array(1),
            names.class_constant("[Lme/Circle;").unwrap(),
            names.class_constant("[Lme/Square;").unwrap(),
            names.class_constant("[[Ljava/lang/String;").unwrap(),
            AbstractType::ReturnAddress(3),
            AbstractType::NewObject(7),
            AbstractType::InitObject,
        ]
    }

    #[test]
    fn merge_is_idempotent_and_commutative() {
        with_names(|names| {
            let types = sample_types(names);
            for &x in &types {
                assert_eq!(names.merge(x, x, false), Ok(x));
                assert_eq!(names.is_assignable(x, x), Ok(true));
                for &y in &types {
                    assert_eq!(
                        names.merge(x, y, false),
                        names.merge(y, x, false),
                        "merging {} and {}",
                        names.display(x),
                        names.display(y)
                    );
                }
            }
        });
    }

    #[test]
    fn everything_is_an_object() {
        with_names(|names| {
            for x in sample_types(names) {
                if x.is_reference() {
                    assert_eq!(names.is_assignable(x, AbstractType::OBJECT), Ok(true));
                } else {
                    assert_eq!(names.is_assignable(x, AbstractType::OBJECT), Ok(false));
                }
            }
        });
    }

    #[test]
    fn class_merges() {
        with_names(|names| {
            let shape = AbstractType::class(names.intern("me/Shape"));
            let circle = AbstractType::class(names.intern("me/Circle"));
            let square = AbstractType::class(names.intern("me/Square"));
            let npe = AbstractType::class(names.intern("java/lang/NullPointerException"));
            let arith = AbstractType::class(names.intern("java/lang/ArithmeticException"));
            let runtime = AbstractType::class(names.intern("java/lang/RuntimeException"));
            let runnable = AbstractType::class(names.intern("java/lang/Runnable"));

            assert_eq!(names.merge(circle, square, false), Ok(shape));
            assert_eq!(names.merge(circle, shape, false), Ok(shape));
            assert_eq!(names.merge(npe, arith, false), Ok(runtime));
            assert_eq!(names.merge(npe, circle, false), Ok(AbstractType::OBJECT));
            assert_eq!(names.merge(AbstractType::Null, circle, false), Ok(circle));

            assert_eq!(names.is_assignable(circle, shape), Ok(true));
            assert_eq!(names.is_assignable(shape, circle), Ok(false));
            assert_eq!(names.is_assignable(npe, AbstractType::THROWABLE), Ok(true));
            assert_eq!(names.is_assignable(AbstractType::Null, circle), Ok(true));

            // Interfaces accept any object, but merge like `java/lang/Object`
            assert_eq!(names.is_assignable(AbstractType::STRING, runnable), Ok(true));
            assert_eq!(names.is_assignable(AbstractType::OBJECT, runnable), Ok(true));
            assert_eq!(names.merge(runnable, circle, false), Ok(AbstractType::OBJECT));
        });
    }

    #[test]
    fn array_merges() {
        with_names(|names| {
            let circles = names.class_constant("[Lme/Circle;").unwrap();
            let squares = names.class_constant("[Lme/Square;").unwrap();
            let shapes = names.class_constant("[Lme/Shape;").unwrap();
            let ints = AbstractType::primitive_array(BaseType::Int, 1);
            let floats = AbstractType::primitive_array(BaseType::Float, 1);
            let int_matrix = AbstractType::primitive_array(BaseType::Int, 2);

            assert_eq!(names.merge(circles, squares, false), Ok(shapes));
            assert_eq!(names.is_assignable(circles, shapes), Ok(true));
            assert_eq!(names.is_assignable(shapes, circles), Ok(false));
            assert_eq!(names.merge(ints, floats, false), Ok(AbstractType::OBJECT));
            assert_eq!(names.merge(int_matrix, circles, false), Ok(AbstractType::object_array(1)));
            assert_eq!(names.merge(ints, AbstractType::STRING, false), Ok(AbstractType::OBJECT));
            assert_eq!(names.is_assignable(ints, AbstractType::OBJECT), Ok(true));
            assert_eq!(names.merge(ints, AbstractType::Integer, false), Ok(AbstractType::Bogus));
        });
    }

    #[test]
    fn primitives_only_merge_with_themselves() {
        with_names(|names| {
            assert_eq!(
                names.merge(AbstractType::Integer, AbstractType::Float, false),
                Ok(AbstractType::Bogus)
            );
            assert_eq!(
                names.merge(AbstractType::Null, AbstractType::Integer, false),
                Ok(AbstractType::Bogus)
            );
            assert_eq!(
                names.merge(AbstractType::NewObject(1), AbstractType::NewObject(2), false),
                Ok(AbstractType::Bogus)
            );
        });
    }
}
