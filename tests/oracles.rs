use formc::form::{MetaValue, Metadata, Point, ReferenceCell};
use formc::{
    compile_form, Element, Entity, Expr, Form, FormcParameters, KernelArgs, LagrangeTabulator,
    Measure, Representation, Side, TabulationKernel,
};

/// Relative tolerance for comparing kernels against hand-computed local
/// tensors.
const TOL: f64 = 1e-12;

fn p1() -> Element {
    Element::lagrange(ReferenceCell::Triangle, 1)
}

fn reference_triangle() -> Vec<Point> {
    vec![[0., 0., 0.], [1., 0., 0.], [0., 1., 0.]]
}

fn compile_one(form: Form) -> TabulationKernel {
    let mut kernels =
        compile_form(&form, &FormcParameters::default(), &LagrangeTabulator).unwrap();
    assert_eq!(kernels.len(), 1);
    kernels.pop().unwrap()
}

fn assert_close(got: &[f64], want: &[f64]) {
    assert_eq!(got.len(), want.len());
    for (i, (g, w)) in got.iter().zip(want.iter()).enumerate() {
        let scale = w.abs().max(1.);
        assert!(
            (g - w).abs() <= TOL * scale,
            "entry {}: got {}, want {} (full: {:?})",
            i,
            g,
            w,
            got
        );
    }
}

#[test]
fn p1_mass_matrix() {
    let form = Form::builder()
        .name("mass")
        .arguments(vec![p1(), p1()])
        .coefficients(vec![])
        .build()
        .integral(
            Expr::mul(Expr::Argument(0), Expr::Argument(1)),
            Measure::dx(),
        );
    let kernel = compile_one(form);
    let coords = [reference_triangle()];
    let out = kernel
        .tabulate(&KernelArgs {
            coordinates: &coords,
            coefficients: &[],
            entity: None,
        })
        .unwrap();
    let d = 1. / 12.;
    let o = 1. / 24.;
    assert_close(&out, &[d, o, o, o, d, o, o, o, d]);
}

#[test]
fn p1_stiffness_matrix() {
    let form = Form::builder()
        .name("stiffness")
        .arguments(vec![p1(), p1()])
        .coefficients(vec![])
        .build()
        .integral(
            Expr::inner(
                Expr::grad(Expr::Argument(0)),
                Expr::grad(Expr::Argument(1)),
            ),
            Measure::dx(),
        );
    let kernel = compile_one(form);
    let coords = [reference_triangle()];
    let args = KernelArgs {
        coordinates: &coords,
        coefficients: &[],
        entity: None,
    };
    let out = kernel.tabulate(&args).unwrap();
    let want = [1., -0.5, -0.5, -0.5, 0.5, 0., -0.5, 0., 0.5];
    assert_close(&out, &want);

    // the stiffness matrix is invariant under uniform scaling in 2d
    let scaled = vec![vec![[0., 0., 0.], [3., 0., 0.], [0., 3., 0.]]];
    let out = kernel
        .tabulate(&KernelArgs {
            coordinates: &scaled,
            coefficients: &[],
            entity: None,
        })
        .unwrap();
    assert_close(&out, &want);
}

#[test]
fn mass_scales_with_the_jacobian() {
    let form = Form::builder()
        .name("mass")
        .arguments(vec![p1(), p1()])
        .coefficients(vec![])
        .build()
        .integral(
            Expr::mul(Expr::Argument(0), Expr::Argument(1)),
            Measure::dx(),
        );
    let kernel = compile_one(form);
    let coords = vec![vec![[1., 1., 0.], [3., 1., 0.], [1., 3., 0.]]];
    let out = kernel
        .tabulate(&KernelArgs {
            coordinates: &coords,
            coefficients: &[],
            entity: None,
        })
        .unwrap();
    // |det J| = 4
    let total: f64 = out.iter().sum();
    assert!((total - 2.).abs() < TOL, "{}", total);
    assert!((out[0] - 4. / 12.).abs() < TOL);
}

#[test]
fn coefficient_weighted_mass() {
    let form = Form::builder()
        .name("wmass")
        .arguments(vec![p1(), p1()])
        .coefficients(vec![p1()])
        .build()
        .integral(
            Expr::mul(
                Expr::Coefficient(0),
                Expr::mul(Expr::Argument(0), Expr::Argument(1)),
            ),
            Measure::dx(),
        );
    let kernel = compile_one(form);
    let coords = [reference_triangle()];
    // w = 1 reduces to the plain mass matrix
    let out = kernel
        .tabulate(&KernelArgs {
            coordinates: &coords,
            coefficients: &[vec![1., 1., 1.]],
            entity: None,
        })
        .unwrap();
    let d = 1. / 12.;
    let o = 1. / 24.;
    assert_close(&out, &[d, o, o, o, d, o, o, o, d]);

    // w = 0 annihilates it
    let out = kernel
        .tabulate(&KernelArgs {
            coordinates: &coords,
            coefficients: &[vec![0., 0., 0.]],
            entity: None,
        })
        .unwrap();
    assert_close(&out, &[0.; 9]);
}

#[test]
fn exterior_facet_linear_form() {
    let form = Form::builder()
        .name("traction")
        .arguments(vec![p1()])
        .coefficients(vec![])
        .build()
        .integral(Expr::Argument(0), Measure::ds());
    let kernel = compile_one(form);
    let coords = [reference_triangle()];
    // facet 0 is the hypotenuse, length sqrt(2)
    let out = kernel
        .tabulate(&KernelArgs {
            coordinates: &coords,
            coefficients: &[],
            entity: Some(Entity::Facet(0)),
        })
        .unwrap();
    let h = 2f64.sqrt() / 2.;
    assert_close(&out, &[0., h, h]);

    // facet 1 is the left edge, length 1
    let out = kernel
        .tabulate(&KernelArgs {
            coordinates: &coords,
            coefficients: &[],
            entity: Some(Entity::Facet(1)),
        })
        .unwrap();
    assert_close(&out, &[0.5, 0., 0.5]);
}

#[test]
fn tetrahedral_facet_linear_form() {
    let el = Element::lagrange(ReferenceCell::Tetrahedron, 1);
    let form = Form::builder()
        .name("traction3d")
        .arguments(vec![el])
        .coefficients(vec![])
        .build()
        .integral(Expr::Argument(0), Measure::ds());
    let kernel = compile_one(form);
    let coords = vec![vec![
        [0., 0., 0.],
        [1., 0., 0.],
        [0., 1., 0.],
        [0., 0., 1.],
    ]];

    // facet 1 is the x = 0 face, area 1/2; each on-facet basis function
    // integrates to a third of it, the opposite one vanishes
    let out = kernel
        .tabulate(&KernelArgs {
            coordinates: &coords,
            coefficients: &[],
            entity: Some(Entity::Facet(1)),
        })
        .unwrap();
    assert_close(&out, &[1. / 6., 0., 1. / 6., 1. / 6.]);
    let total: f64 = out.iter().sum();
    assert!((total - 0.5).abs() < TOL, "{}", total);

    // facet 0 is the oblique face, area sqrt(3)/2
    let out = kernel
        .tabulate(&KernelArgs {
            coordinates: &coords,
            coefficients: &[],
            entity: Some(Entity::Facet(0)),
        })
        .unwrap();
    let third = 3f64.sqrt() / 6.;
    assert_close(&out, &[0., third, third, third]);
}

#[test]
fn facet_normal_points_outward() {
    let form = Form::builder()
        .name("flux")
        .arguments(vec![p1()])
        .coefficients(vec![])
        .build()
        .integral(
            Expr::mul(
                Expr::Argument(0),
                Expr::dot(Expr::FacetNormal, Expr::FacetNormal),
            ),
            Measure::ds(),
        );
    // |n| = 1, so this is just the facet linear form again
    let kernel = compile_one(form);
    let coords = [reference_triangle()];
    let out = kernel
        .tabulate(&KernelArgs {
            coordinates: &coords,
            coefficients: &[],
            entity: Some(Entity::Facet(1)),
        })
        .unwrap();
    assert_close(&out, &[0.5, 0., 0.5]);
}

/// Two cells sharing the facet from (1, 0) to (0, 1); both list their
/// vertices in ascending global order, so the shared facet is facet 0 of
/// the plus cell and facet 2 of the minus cell.
fn facet_pair() -> (Vec<Vec<Point>>, Entity) {
    let plus = vec![[0., 0., 0.], [1., 0., 0.], [0., 1., 0.]];
    let minus = vec![[1., 0., 0.], [0., 1., 0.], [1., 1., 0.]];
    (vec![plus, minus], Entity::FacetPair(0, 2))
}

#[test]
fn interior_facet_averages_and_jumps() {
    let len = 2f64.sqrt();
    let functional = |integrand: Expr| {
        Form::builder()
            .name("facet_functional")
            .arguments(vec![])
            .coefficients(vec![p1()])
            .build()
            .integral(integrand, Measure::ds_interior())
    };
    let (coords, entity) = facet_pair();

    // continuous coefficient: jump vanishes, average is the trace.
    // w = x + y equals 1 along the shared facet.
    let continuous = vec![0., 1., 1., 1., 1., 2.];
    let kernel = compile_one(functional(Expr::avg(Expr::Coefficient(0))));
    let out = kernel
        .tabulate(&KernelArgs {
            coordinates: &coords,
            coefficients: &[continuous.clone()],
            entity: Some(entity),
        })
        .unwrap();
    assert_close(&out, &[len]);

    let jumpy = Expr::mul(
        Expr::jump(Expr::Coefficient(0)),
        Expr::jump(Expr::Coefficient(0)),
    );
    let kernel = compile_one(functional(jumpy));
    let out = kernel
        .tabulate(&KernelArgs {
            coordinates: &coords,
            coefficients: &[continuous],
            entity: Some(entity),
        })
        .unwrap();
    assert_close(&out, &[0.]);

    // w = 0 on the plus cell, 1 on the minus cell: jump = -1, avg = 1/2
    let split = vec![0., 0., 0., 1., 1., 1.];
    let kernel = compile_one(functional(Expr::mul(
        Expr::jump(Expr::Coefficient(0)),
        Expr::jump(Expr::Coefficient(0)),
    )));
    let out = kernel
        .tabulate(&KernelArgs {
            coordinates: &coords,
            coefficients: &[split.clone()],
            entity: Some(entity),
        })
        .unwrap();
    assert_close(&out, &[len]);

    let kernel = compile_one(functional(Expr::avg(Expr::Coefficient(0))));
    let out = kernel
        .tabulate(&KernelArgs {
            coordinates: &coords,
            coefficients: &[split],
            entity: Some(entity),
        })
        .unwrap();
    assert_close(&out, &[0.5 * len]);
}

#[test]
fn facet_normals_oppose_across_interior_facets() {
    let form = Form::builder()
        .name("normals")
        .arguments(vec![])
        .coefficients(vec![p1()])
        .build()
        .integral(
            Expr::dot(
                Expr::restrict(Expr::FacetNormal, Side::Plus),
                Expr::restrict(Expr::FacetNormal, Side::Minus),
            ),
            Measure::ds_interior(),
        );
    let kernel = compile_one(form);
    let (coords, entity) = facet_pair();
    let out = kernel
        .tabulate(&KernelArgs {
            coordinates: &coords,
            coefficients: &[vec![0.; 6]],
            entity: Some(entity),
        })
        .unwrap();
    // n(+) . n(-) = -1, integrated over a facet of length sqrt(2)
    assert_close(&out, &[-(2f64.sqrt())]);
}

#[test]
fn interior_facet_jump_bilinear_form_is_symmetric() {
    let form = Form::builder()
        .name("jump_mass")
        .arguments(vec![p1(), p1()])
        .coefficients(vec![])
        .build()
        .integral(
            Expr::mul(
                Expr::jump(Expr::Argument(0)),
                Expr::jump(Expr::Argument(1)),
            ),
            Measure::ds_interior(),
        );
    let kernel = compile_one(form);
    assert_eq!(kernel.dims, vec![6, 6]);
    let (coords, entity) = facet_pair();
    let out = kernel
        .tabulate(&KernelArgs {
            coordinates: &coords,
            coefficients: &[],
            entity: Some(entity),
        })
        .unwrap();
    for i in 0..6 {
        for j in 0..6 {
            assert!((out[i * 6 + j] - out[j * 6 + i]).abs() < TOL);
        }
    }
    // jump of anything continuous is annihilated: rows sum against the
    // all-ones macro vector must vanish
    for i in 0..6 {
        let row: f64 = (0..6).map(|j| out[i * 6 + j]).sum();
        assert!(row.abs() < TOL, "row {}: {}", i, row);
    }
}

#[test]
fn vertex_integral_picks_basis_values() {
    let form = Form::builder()
        .name("point_source")
        .arguments(vec![p1()])
        .coefficients(vec![])
        .build()
        .integral(Expr::Argument(0), Measure::dp());
    let kernel = compile_one(form);
    let coords = vec![vec![[2., 1., 0.], [5., 1., 0.], [2., 7., 0.]]];
    for v in 0..3 {
        let out = kernel
            .tabulate(&KernelArgs {
                coordinates: &coords,
                coefficients: &[],
                entity: Some(Entity::Vertex(v)),
            })
            .unwrap();
        let mut want = [0.; 3];
        want[v] = 1.;
        assert_close(&out, &want);
    }
}

#[test]
fn custom_integral_with_one_cell_matches_dx() {
    let dx_form = Form::builder()
        .name("mass")
        .arguments(vec![p1(), p1()])
        .coefficients(vec![])
        .build()
        .integral(
            Expr::mul(Expr::Argument(0), Expr::Argument(1)),
            Measure::dx(),
        );
    let dc_form = Form::builder()
        .name("cut_mass")
        .arguments(vec![p1(), p1()])
        .coefficients(vec![])
        .build()
        .integral(
            Expr::mul(Expr::Argument(0), Expr::Argument(1)),
            Measure::dc()
                .with_metadata(Metadata::new().with("num_cells", MetaValue::from(1i64))),
        );
    let coords = [reference_triangle()];
    let a = compile_one(dx_form)
        .tabulate(&KernelArgs {
            coordinates: &coords,
            coefficients: &[],
            entity: None,
        })
        .unwrap();
    let b = compile_one(dc_form)
        .tabulate(&KernelArgs {
            coordinates: &coords,
            coefficients: &[],
            entity: None,
        })
        .unwrap();
    assert_close(&b, &a);
}

#[test]
fn custom_integrals_scale_by_the_first_cell() {
    // w('+') + w('-') over a 2-cell custom domain: weights and the
    // measure factor both come from cell 0, whatever cell 1 looks like
    let form = Form::builder()
        .name("cut_pair")
        .arguments(vec![])
        .coefficients(vec![p1()])
        .build()
        .integral(
            Expr::add(
                Expr::restrict(Expr::Coefficient(0), Side::Plus),
                Expr::restrict(Expr::Coefficient(0), Side::Minus),
            ),
            Measure::dc()
                .with_metadata(Metadata::new().with("num_cells", MetaValue::from(2i64))),
        );
    let kernel = compile_one(form);
    let ones = vec![1.; 6];
    for cell1_scale in [1., 10.] {
        let coords = vec![
            reference_triangle(),
            vec![
                [0., 0., 0.],
                [cell1_scale, 0., 0.],
                [0., cell1_scale, 0.],
            ],
        ];
        let out = kernel
            .tabulate(&KernelArgs {
                coordinates: &coords,
                coefficients: &[ones.clone()],
                entity: None,
            })
            .unwrap();
        // (1 + 1) integrated over cell 0, which has unit Jacobian
        assert_close(&out, &[1.]);
    }
}

#[test]
fn geometric_quantities() {
    let functional = |integrand: Expr| {
        Form::builder()
            .name("geo")
            .arguments(vec![])
            .coefficients(vec![p1()])
            .build()
            .integral(integrand, Measure::dx())
    };
    let coords = [reference_triangle()];
    let zeros = vec![0.; 3];

    // int_T vol(T) dx = vol(T)^2
    let out = compile_one(functional(Expr::CellVolume))
        .tabulate(&KernelArgs {
            coordinates: &coords,
            coefficients: &[zeros.clone()],
            entity: None,
        })
        .unwrap();
    assert_close(&out, &[0.25]);

    // circumradius of the reference triangle is sqrt(2)/2
    let out = compile_one(functional(Expr::Circumradius))
        .tabulate(&KernelArgs {
            coordinates: &coords,
            coefficients: &[zeros],
            entity: None,
        })
        .unwrap();
    assert_close(&out, &[0.5 * 2f64.sqrt() / 2.]);
}

#[test]
fn representations_agree() {
    let mut params = FormcParameters::default();
    let build = || {
        Form::builder()
            .name("stiffness")
            .arguments(vec![p1(), p1()])
            .coefficients(vec![])
            .build()
            .integral(
                Expr::inner(
                    Expr::grad(Expr::Argument(0)),
                    Expr::grad(Expr::Argument(1)),
                ),
                Measure::dx(),
            )
    };
    let coords = vec![vec![[0., 0., 0.], [2., 0.5, 0.], [0.5, 3., 0.]]];

    params.representation = Representation::Quadrature;
    let q = compile_form(&build(), &params, &LagrangeTabulator).unwrap();
    params.representation = Representation::Uflacs;
    let u = compile_form(&build(), &params, &LagrangeTabulator).unwrap();

    let args = KernelArgs {
        coordinates: &coords,
        coefficients: &[],
        entity: None,
    };
    let a = q[0].tabulate(&args).unwrap();
    let b = u[0].tabulate(&args).unwrap();
    assert_close(&a, &b);
}

#[test]
fn compilation_is_deterministic() {
    let build = || {
        Form::builder()
            .name("mass")
            .arguments(vec![p1(), p1()])
            .coefficients(vec![])
            .build()
            .integral(
                Expr::mul(Expr::Argument(0), Expr::Argument(1)),
                Measure::dx(),
            )
    };
    let a = compile_one(build());
    let b = compile_one(build());
    assert_eq!(a, b);

    let coords = [reference_triangle()];
    let args = KernelArgs {
        coordinates: &coords,
        coefficients: &[],
        entity: None,
    };
    let x = a.tabulate(&args).unwrap();
    let y = b.tabulate(&args).unwrap();
    assert_eq!(x, y);
}

#[test]
fn tetrahedral_mass_matrix_total() {
    let el = Element::lagrange(ReferenceCell::Tetrahedron, 1);
    let form = Form::builder()
        .name("mass3d")
        .arguments(vec![el.clone(), el])
        .coefficients(vec![])
        .build()
        .integral(
            Expr::mul(Expr::Argument(0), Expr::Argument(1)),
            Measure::dx(),
        );
    let kernel = compile_one(form);
    let coords = vec![vec![
        [0., 0., 0.],
        [1., 0., 0.],
        [0., 1., 0.],
        [0., 0., 1.],
    ]];
    let out = kernel
        .tabulate(&KernelArgs {
            coordinates: &coords,
            coefficients: &[],
            entity: None,
        })
        .unwrap();
    // partition of unity: entries sum to the cell volume
    let total: f64 = out.iter().sum();
    assert!((total - 1. / 6.).abs() < TOL, "{}", total);
    // P1 mass on a tet: diagonal V/10, off-diagonal V/20
    assert_close(&out[0..4], &[1. / 60., 1. / 120., 1. / 120., 1. / 120.]);
}

#[test]
fn wrong_runtime_inputs_are_rejected() {
    let form = Form::builder()
        .name("mass")
        .arguments(vec![p1(), p1()])
        .coefficients(vec![])
        .build()
        .integral(
            Expr::mul(Expr::Argument(0), Expr::Argument(1)),
            Measure::dx(),
        );
    let kernel = compile_one(form);
    let coords = [reference_triangle()];

    // cell kernels take no entity
    assert!(kernel
        .tabulate(&KernelArgs {
            coordinates: &coords,
            coefficients: &[],
            entity: Some(Entity::Facet(0)),
        })
        .is_err());

    // wrong number of coordinate blocks
    let two = vec![reference_triangle(), reference_triangle()];
    assert!(kernel
        .tabulate(&KernelArgs {
            coordinates: &two,
            coefficients: &[],
            entity: None,
        })
        .is_err());

    // degenerate cell
    let flat = vec![vec![[0., 0., 0.], [1., 0., 0.], [2., 0., 0.]]];
    assert!(kernel
        .tabulate(&KernelArgs {
            coordinates: &flat,
            coefficients: &[],
            entity: None,
        })
        .is_err());
}
