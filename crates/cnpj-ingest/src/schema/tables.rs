//! Column layouts of the CNPJ open-data export
//!
//! Column order is the field order of the source files. Widths follow the
//! layout published with the dataset; text limits are generous because the
//! source regularly exceeds its nominal widths.

use super::{ColumnType, FileMatcher, TableKind, TableSpec};

const fn code(width: usize) -> ColumnType {
    ColumnType::code(width)
}

const fn text(max_len: usize) -> ColumnType {
    ColumnType::text(max_len)
}

const DATE: ColumnType = ColumnType::Date;

pub(super) fn cnpj_tables() -> Vec<TableSpec> {
    vec![
        TableSpec::new(
            TableKind::Empresas,
            &[
                ("cnpj_basico", code(8)),
                ("razao_social", text(200)),
                ("natureza_juridica", code(4)),
                ("qualificacao_responsavel", code(2)),
                ("capital_social", ColumnType::Currency),
                ("porte_empresa", code(2)),
                ("ente_federativo_responsavel", text(100)),
            ],
            FileMatcher::new(&["EMPRE", "EMPRESAS"]).requiring("CSV"),
        ),
        TableSpec::new(
            TableKind::Estabelecimentos,
            &[
                ("cnpj_basico", code(8)),
                ("cnpj_ordem", code(4)),
                ("cnpj_dv", code(2)),
                ("identificador_matriz_filial", code(1)),
                ("nome_fantasia", text(200)),
                ("situacao_cadastral", code(2)),
                ("data_situacao_cadastral", DATE),
                ("motivo_situacao_cadastral", code(2)),
                ("nome_cidade_exterior", text(100)),
                ("pais", code(3)),
                ("data_inicio_atividade", DATE),
                ("cnae_fiscal_principal", code(7)),
                ("cnae_fiscal_secundaria", ColumnType::unbounded_text()),
                ("tipo_logradouro", text(50)),
                ("logradouro", text(200)),
                ("numero", text(20)),
                ("complemento", text(200)),
                ("bairro", text(100)),
                ("cep", code(8)),
                ("uf", text(2)),
                ("municipio", code(4)),
                ("ddd_1", text(4)),
                ("telefone_1", text(15)),
                ("ddd_2", text(4)),
                ("telefone_2", text(15)),
                ("ddd_fax", text(4)),
                ("fax", text(15)),
                ("correio_eletronico", text(150)),
                ("situacao_especial", text(100)),
                ("data_situacao_especial", DATE),
            ],
            FileMatcher::new(&["ESTABELE", "ESTABELECIMENTOS"]),
        )
        .with_generated(
            "cnpj",
            "VARCHAR(14)",
            "cnpj_basico || cnpj_ordem || cnpj_dv",
        ),
        TableSpec::new(
            TableKind::Socios,
            &[
                ("cnpj_basico", code(8)),
                ("identificador_socio", code(1)),
                ("nome_socio", text(200)),
                ("cnpj_cpf_socio", text(20)),
                ("qualificacao_socio", code(2)),
                ("data_entrada_sociedade", DATE),
                ("pais", code(3)),
                ("representante_legal", text(20)),
                ("nome_representante", text(200)),
                ("qualificacao_representante", code(2)),
                ("faixa_etaria", code(1)),
            ],
            FileMatcher::new(&["SOCIO", "SOCIOS"]),
        ),
        TableSpec::new(
            TableKind::Simples,
            &[
                ("cnpj_basico", code(8)),
                ("opcao_simples", text(1)),
                ("data_opcao_simples", DATE),
                ("data_exclusao_simples", DATE),
                ("opcao_mei", text(1)),
                ("data_opcao_mei", DATE),
                ("data_exclusao_mei", DATE),
            ],
            FileMatcher::new(&["SIMPLES"]),
        ),
        lookup(TableKind::Cnaes, 7, 300, &["CNAE"]),
        lookup(TableKind::Motivos, 2, 200, &["MOTI"]),
        lookup(TableKind::Municipios, 4, 100, &["MUNIC"]),
        lookup(TableKind::Naturezas, 4, 200, &["NATJU"]),
        lookup(TableKind::Paises, 3, 100, &["PAIS"]),
        lookup(TableKind::Qualificacoes, 2, 200, &["QUALS"]),
    ]
}

fn lookup(
    kind: TableKind,
    code_width: usize,
    description_len: usize,
    markers: &'static [&'static str],
) -> TableSpec {
    TableSpec::new(
        kind,
        &[("codigo", code(code_width)), ("descricao", text(description_len))],
        FileMatcher::new(markers),
    )
}
