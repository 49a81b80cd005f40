use crate::chunking::normalize_whitespace;
use crate::error::IngestError;
use crate::models::{Fragment, FragmentContent};
use roxmltree::{Document, Node, ParsingOptions};
use std::path::Path;

pub fn extract_module(path: &Path, source_id: &str) -> Result<Vec<Fragment>, IngestError> {
    let xml = std::fs::read_to_string(path)?;
    parse_module(source_id, &xml)
}

/// Walks one S1000D data module and emits a fragment per paragraph, title,
/// procedural step, list, table and figure, in document order.
pub fn parse_module(source_id: &str, xml: &str) -> Result<Vec<Fragment>, IngestError> {
    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    let document =
        Document::parse_with_options(xml, options).map_err(|error| IngestError::XmlParse {
            source_id: source_id.to_string(),
            details: error.to_string(),
        })?;

    let root = document.root_element();
    let module_code = root
        .descendants()
        .find(|node| node.has_tag_name("dmCode"))
        .and_then(data_module_code)
        .unwrap_or_else(|| source_id.to_string());

    let mut walk = ModuleWalk {
        source_id,
        module_code,
        fragments: Vec::new(),
    };

    if let Some(title) = root
        .descendants()
        .find(|node| node.has_tag_name("dmTitle"))
        .map(dm_title)
        .filter(|title| !title.is_empty())
    {
        walk.push(FragmentContent::Heading(title), None);
    }

    match root.children().find(|node| node.has_tag_name("content")) {
        Some(content) => walk.walk(content, ""),
        None => walk.walk(root, ""),
    }

    Ok(walk.fragments)
}

/// `DMC-MODEL-SDC-SYS-SUBSUBSUB-ASSY-DISVAR-INFOVAR-LOC`
fn data_module_code(node: Node) -> Option<String> {
    let attr = |name: &str| node.attribute(name).unwrap_or_default();
    let model = node.attribute("modelIdentCode")?;
    Some(format!(
        "DMC-{model}-{}-{}-{}{}-{}-{}{}-{}{}-{}",
        attr("systemDiffCode"),
        attr("systemCode"),
        attr("subSystemCode"),
        attr("subSubSystemCode"),
        attr("assyCode"),
        attr("disassyCode"),
        attr("disassyCodeVariant"),
        attr("infoCode"),
        attr("infoCodeVariant"),
        attr("itemLocationCode"),
    ))
}

fn dm_title(node: Node) -> String {
    let part = |name: &str| {
        node.children()
            .find(|child| child.has_tag_name(name))
            .map(collect_text)
            .unwrap_or_default()
    };
    let tech = part("techName");
    let info = part("infoName");
    match (tech.is_empty(), info.is_empty()) {
        (false, false) => format!("{tech} - {info}"),
        (false, true) => tech,
        _ => info,
    }
}

fn collect_text(node: Node) -> String {
    let raw = node
        .descendants()
        .filter(|child| child.is_text())
        .filter_map(|child| child.text())
        .collect::<Vec<_>>()
        .join(" ");
    normalize_whitespace(&raw)
}

/// Block elements that S1000D allows inside a paragraph.
const NESTED_BLOCKS: [&str; 4] = ["randomList", "sequentialList", "definitionList", "table"];

/// Text of a paragraph without the lists and tables nested in it.
fn own_text(node: Node) -> String {
    let mut parts = Vec::new();
    gather_own_text(node, &mut parts);
    normalize_whitespace(&parts.join(" "))
}

fn gather_own_text(node: Node, parts: &mut Vec<String>) {
    for child in node.children() {
        if child.is_text() {
            if let Some(text) = child.text() {
                parts.push(text.to_string());
            }
        } else if child.is_element() && !NESTED_BLOCKS.contains(&child.tag_name().name()) {
            gather_own_text(child, parts);
        }
    }
}

fn child_title(node: Node) -> Option<String> {
    node.children()
        .find(|child| child.has_tag_name("title"))
        .map(collect_text)
        .filter(|title| !title.is_empty())
}

struct ModuleWalk<'a> {
    source_id: &'a str,
    module_code: String,
    fragments: Vec<Fragment>,
}

impl ModuleWalk<'_> {
    fn push(&mut self, content: FragmentContent, element_id: Option<&str>) {
        self.fragments.push(Fragment {
            source_id: self.source_id.to_string(),
            ordinal: self.fragments.len(),
            page: None,
            module_code: Some(self.module_code.clone()),
            element_id: element_id.map(str::to_string),
            content,
            region: None,
        });
    }

    fn walk(&mut self, node: Node, step_prefix: &str) {
        let mut step_number = 0usize;
        for child in node.children().filter(Node::is_element) {
            self.visit(child, step_prefix, &mut step_number);
        }
    }

    /// Emits a procedural step and its content in document order. The first
    /// paragraph carries the step label; later ones follow as plain text.
    fn step(&mut self, step: Node, label: &str) {
        let mut labelled = false;
        let mut sub_steps = 0usize;

        for child in step.children().filter(Node::is_element) {
            if !child.has_tag_name("para") {
                self.visit(child, label, &mut sub_steps);
                continue;
            }
            let text = own_text(child);
            if !text.is_empty() {
                let content = if labelled {
                    FragmentContent::TextBlock(text)
                } else {
                    labelled = true;
                    FragmentContent::List(vec![format!("Step {label}: {text}")])
                };
                self.push(content, child.attribute("id"));
            }
            self.nested_blocks(child, label);
        }
    }

    /// Lists and tables embedded in running text become fragments of their own,
    /// after the text that introduces them.
    fn nested_blocks(&mut self, node: Node, step_prefix: &str) {
        let mut unused = 0usize;
        for child in node.children().filter(Node::is_element) {
            if NESTED_BLOCKS.contains(&child.tag_name().name()) {
                self.visit(child, step_prefix, &mut unused);
            } else {
                self.nested_blocks(child, step_prefix);
            }
        }
    }

    fn visit(&mut self, child: Node, step_prefix: &str, step_number: &mut usize) {
        let id = child.attribute("id");
        match child.tag_name().name() {
            "identAndStatusSection" | "idstatus" => {}
            "title" => {
                let text = collect_text(child);
                if !text.is_empty() {
                    self.push(FragmentContent::Heading(text), id);
                }
            }
            "para" | "warningAndCautionPara" | "notePara" => {
                let text = own_text(child);
                if !text.is_empty() {
                    self.push(FragmentContent::TextBlock(text), id);
                }
                self.nested_blocks(child, step_prefix);
            }
            marker @ ("warning" | "caution" | "note") => {
                let text = collect_text(child);
                if !text.is_empty() {
                    let label = marker.to_uppercase();
                    self.push(FragmentContent::TextBlock(format!("{label}: {text}")), id);
                }
            }
            "proceduralStep" => {
                *step_number += 1;
                let label = if step_prefix.is_empty() {
                    step_number.to_string()
                } else {
                    format!("{step_prefix}.{step_number}")
                };
                self.step(child, &label);
            }
            "randomList" | "sequentialList" => {
                let items = child
                    .children()
                    .filter(|item| item.has_tag_name("listItem"))
                    .map(collect_text)
                    .filter(|text| !text.is_empty())
                    .collect::<Vec<_>>();
                if !items.is_empty() {
                    self.push(FragmentContent::List(items), id);
                }
            }
            "definitionList" => {
                let items = child
                    .descendants()
                    .filter(|item| item.has_tag_name("definitionListItem"))
                    .map(|item| {
                        let term = item
                            .children()
                            .find(|part| part.has_tag_name("listItemTerm"))
                            .map(collect_text)
                            .unwrap_or_default();
                        let definition = item
                            .children()
                            .find(|part| part.has_tag_name("listItemDefinition"))
                            .map(collect_text)
                            .unwrap_or_default();
                        format!("{term}: {definition}")
                    })
                    .collect::<Vec<_>>();
                if !items.is_empty() {
                    self.push(FragmentContent::List(items), id);
                }
            }
            "table" => {
                let rows = child
                    .descendants()
                    .filter(|row| row.has_tag_name("row"))
                    .map(|row| {
                        row.children()
                            .filter(|entry| entry.has_tag_name("entry"))
                            .map(collect_text)
                            .collect::<Vec<_>>()
                    })
                    .filter(|row| !row.is_empty())
                    .collect::<Vec<_>>();
                if !rows.is_empty() {
                    self.push(
                        FragmentContent::Table {
                            caption: child_title(child),
                            rows,
                        },
                        id,
                    );
                }
            }
            "figure" => {
                let graphic_ref = child
                    .descendants()
                    .find(|graphic| graphic.has_tag_name("graphic"))
                    .and_then(|graphic| graphic.attribute("infoEntityIdent"))
                    .map(str::to_string);
                self.push(
                    FragmentContent::Image {
                        caption: child_title(child),
                        image: None,
                        graphic_ref,
                    },
                    id,
                );
            }
            _ => self.walk(child, step_prefix),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FragmentKind;

    const DESCRIPTIVE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE dmodule [
<!ENTITY ICN-BIKE-00001 SYSTEM "ICN-BIKE-00001.CGM" NDATA cgm>
]>
<dmodule>
  <identAndStatusSection>
    <dmAddress>
      <dmIdent>
        <dmCode modelIdentCode="S1000DBIKE" systemDiffCode="AAA" systemCode="DA1"
          subSystemCode="0" subSubSystemCode="0" assyCode="00" disassyCode="00"
          disassyCodeVariant="AA" infoCode="041" infoCodeVariant="A" itemLocationCode="A"/>
      </dmIdent>
    </dmAddress>
  </identAndStatusSection>
  <content>
    <description>
      <para id="par-0001">The brake system stops the bicycle.</para>
      <para id="par-0002">Each brake has a lever, a cable and a caliper.</para>
      <figure id="fig-0001">
        <title>Brake caliper</title>
        <graphic infoEntityIdent="ICN-BIKE-00001"/>
      </figure>
      <para id="par-0003">Adjust the cable tension to the specified value.</para>
    </description>
  </content>
</dmodule>"#;

    #[test]
    fn descriptive_module_yields_paragraphs_and_figure() {
        let fragments = parse_module("DMC-BIKE-041", DESCRIPTIVE).expect("module should parse");

        let kinds = fragments.iter().map(Fragment::kind).collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![
                FragmentKind::TextBlock,
                FragmentKind::TextBlock,
                FragmentKind::Image,
                FragmentKind::TextBlock,
            ]
        );
        assert_eq!(fragments[0].element_id.as_deref(), Some("par-0001"));
        assert_eq!(
            fragments[0].module_code.as_deref(),
            Some("DMC-S1000DBIKE-AAA-DA1-00-00-00AA-041A-A")
        );
        assert_eq!(
            fragments[2].content,
            FragmentContent::Image {
                caption: Some("Brake caliper".to_string()),
                image: None,
                graphic_ref: Some("ICN-BIKE-00001".to_string()),
            }
        );
        assert!(fragments.iter().enumerate().all(|(i, f)| f.ordinal == i));
    }

    #[test]
    fn procedural_steps_are_numbered_hierarchically() {
        let xml = r#"<dmodule><content><procedure><mainProcedure>
            <proceduralStep><para>Remove the wheel.</para>
              <proceduralStep><para>Loosen the axle nut.</para></proceduralStep>
            </proceduralStep>
            <proceduralStep>
              <warning><warningAndCautionPara>Discs can be hot.</warningAndCautionPara></warning>
              <para>Inspect the disc.</para>
            </proceduralStep>
        </mainProcedure></procedure></content></dmodule>"#;

        let fragments = parse_module("proc", xml).expect("module should parse");
        let texts = fragments
            .iter()
            .map(|fragment| fragment.content.plain_text())
            .collect::<Vec<_>>();

        assert_eq!(
            texts,
            vec![
                "Step 1: Remove the wheel.",
                "Step 1.1: Loosen the axle nut.",
                "WARNING: Discs can be hot.",
                "Step 2: Inspect the disc.",
            ]
        );
    }

    #[test]
    fn step_content_keeps_document_order() {
        let xml = r#"<dmodule><content><procedure><mainProcedure>
            <proceduralStep>
              <para>Fit the new pads.</para>
              <caution><warningAndCautionPara>Do not touch the pad surface.</warningAndCautionPara></caution>
              <para>Pump the lever to seat them.</para>
            </proceduralStep>
        </mainProcedure></procedure></content></dmodule>"#;

        let fragments = parse_module("order", xml).expect("module should parse");
        let texts = fragments
            .iter()
            .map(|fragment| fragment.content.plain_text())
            .collect::<Vec<_>>();

        assert_eq!(
            texts,
            vec![
                "Step 1: Fit the new pads.",
                "CAUTION: Do not touch the pad surface.",
                "Pump the lever to seat them.",
            ]
        );
        assert_eq!(fragments[2].kind(), FragmentKind::TextBlock);
    }

    #[test]
    fn lists_inside_paragraphs_stay_lists() {
        let xml = r#"<dmodule><content><description>
            <para>Check:<randomList>
              <listItem><para>pads</para></listItem>
              <listItem><para>cable</para></listItem>
            </randomList></para>
        </description></content></dmodule>"#;

        let fragments = parse_module("nested", xml).expect("module should parse");
        assert_eq!(
            fragments
                .iter()
                .map(|fragment| fragment.content.clone())
                .collect::<Vec<_>>(),
            vec![
                FragmentContent::TextBlock("Check:".to_string()),
                FragmentContent::List(vec!["pads".to_string(), "cable".to_string()]),
            ]
        );
    }

    #[test]
    fn module_title_leads_as_heading() {
        let xml = r#"<dmodule>
          <identAndStatusSection><dmAddress><dmIdent>
            <dmCode modelIdentCode="BIKE" systemDiffCode="A" systemCode="DA1"
              subSystemCode="0" subSubSystemCode="0" assyCode="00" disassyCode="00"
              disassyCodeVariant="A" infoCode="040" infoCodeVariant="A" itemLocationCode="A"/>
          </dmIdent><dmAddressItems>
            <dmTitle><techName>Brake system</techName><infoName>Description</infoName></dmTitle>
          </dmAddressItems></dmAddress></identAndStatusSection>
          <content><description>
            <para>The brake system stops the bicycle.</para>
          </description></content>
        </dmodule>"#;

        let fragments = parse_module("titled", xml).expect("module should parse");
        assert_eq!(
            fragments[0].content,
            FragmentContent::Heading("Brake system - Description".to_string())
        );
        assert_eq!(fragments[1].kind(), FragmentKind::TextBlock);
        assert_eq!(fragments.len(), 2);
    }

    #[test]
    fn tables_keep_rows_and_caption() {
        let xml = r#"<dmodule><content><description>
            <table><title>Torque values</title><tgroup cols="2">
              <thead><row><entry>Item</entry><entry>Nm</entry></row></thead>
              <tbody><row><entry>Axle nut</entry><entry>35</entry></row></tbody>
            </tgroup></table>
        </description></content></dmodule>"#;

        let fragments = parse_module("tbl", xml).expect("module should parse");
        assert_eq!(fragments.len(), 1);
        assert_eq!(
            fragments[0].content,
            FragmentContent::Table {
                caption: Some("Torque values".to_string()),
                rows: vec![
                    vec!["Item".to_string(), "Nm".to_string()],
                    vec!["Axle nut".to_string(), "35".to_string()],
                ],
            }
        );
        assert_eq!(fragments[0].module_code.as_deref(), Some("tbl"));
    }

    #[test]
    fn malformed_module_is_an_error() {
        let result = parse_module("bad", "<dmodule><content></dmodule>");
        assert!(matches!(result, Err(IngestError::XmlParse { .. })));
    }
}
