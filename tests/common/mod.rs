//! Shared fixtures for integration tests: canned portal pages served through
//! wiremock, encoded the way the portal encodes them (ISO-8859-1).

#![allow(dead_code)]

use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Encode a fixture as ISO-8859-1 the way the portal serves pages
pub fn latin1(s: &str) -> Vec<u8> {
    s.chars()
        .map(|c| if (c as u32) < 256 { c as u8 } else { b'?' })
        .collect()
}

/// An HTML response with the portal's content type
pub fn html_response(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(latin1(body), "text/html; charset=iso-8859-1")
}

pub fn login_page() -> String {
    r#"<html><body>
      <form id="frmLogin" action="/sip/login.php" method="post">
        <input type="text" name="txtUsuario" value="">
        <input type="password" name="pwdSenha" value="">
        <select name="selOrgao"><option value="28" selected>SEPLAG</option></select>
      </form>
    </body></html>"#
        .to_string()
}

pub fn landing_page() -> String {
    r##"<html><body>
      <a href="#">Sair</a>
      <a href="controlador.php?acao=procedimento_controlar&infra_sistema=100000100">Controle de Processos</a>
    </body></html>"##
        .to_string()
}

fn case_row(number: &str, proc_id: &str, viewed: bool, title: &str, kind: &str) -> String {
    let css_class = if viewed {
        "processoVisualizado"
    } else {
        "processoNaoVisualizado"
    };
    format!(
        r#"<tr id="P{proc_id}">
             <td><a href="controlador.php?acao=procedimento_trabalhar&id_procedimento={proc_id}&infra_hash=hash{proc_id}"
                    class="{css_class}" onmouseover="infraTooltipMostrar('{title}','{kind}')">{number}</a></td>
             <td><a onmouseover="infraTooltipMostrar('Urgente')"><img class="imagemStatus" src="/infra_css/marcador.svg"></a></td>
           </tr>"#
    )
}

/// Control page: unit selector (desired unit active), one received case and
/// one generated case, single page each
pub fn control_page(active_unit: &str) -> String {
    let received = case_row(
        "1500.01.0000410/2024-11",
        "410",
        false,
        "Solicitação de diária",
        "Ofício",
    );
    let generated = case_row(
        "1500.01.0000777/2024-77",
        "777",
        true,
        "Prestação de contas",
        "Relatório",
    );
    format!(
        r##"<html><body>
      <a href="#">Sair</a>
      <form id="frmProcedimentoControlar" action="controlador.php?acao=procedimento_controlar" method="post">
        <select id="selInfraUnidades" name="selInfraUnidades">
          <option value="110000001" {selected_a}>{active_unit}</option>
          <option value="110000002">SEPLAG/OUTRA</option>
        </select>
        <input type="hidden" name="hdnRecebidosPaginaAtual" value="0">
        <input type="hidden" name="hdnGeradosPaginaAtual" value="0">
        <table id="tblProcessosRecebidos">
          <caption>Recebidos ( - 1 a 1 de 1 registros)</caption>
          {received}
        </table>
        <table id="tblProcessosGerados">
          <caption>Gerados ( - 1 a 1 de 1 registros)</caption>
          {generated}
        </table>
      </form>
    </body></html>"##,
        selected_a = "selected",
    )
}

/// Case page: only the document tree frame matters
pub fn case_page(proc_id: &str) -> String {
    format!(
        r#"<html><body>
      <iframe id="ifrArvore" src="controlador.php?acao=arvore_visualizar&id_arvore={proc_id}"></iframe>
      <iframe id="ifrVisualizacao" src="about:blank"></iframe>
    </body></html>"#
    )
}

/// Document tree frame: JS node constructors plus the generate-PDF link
pub fn tree_page(proc_id: &str) -> String {
    format!(
        r#"<html><body>
      <a href="controlador.php?acao=procedimento_gerar_pdf&id_procedimento={proc_id}">
        <img alt="Gerar PDF do Processo" src="/infra_css/pdf.svg">
      </a>
      <script>
        Nos[0] = new infraArvoreNo("PASTA","{proc_id}","","","","","Processo","pasta.svg",null,null,null,null,null,null,"","");
        Nos[1] = new infraArvoreNo("DOCUMENTO","D9001","{proc_id}","controlador.php?acao=documento_visualizar&id_documento=9001&infra_hash=dhash","ifrVisualizacao","","Ofício 9001","documento.svg",null,null,null,null,null,null,"infraArvoreNoVisitado","9001");
        Nos[1].src = 'controlador.php?acao=documento_visualizar&id_documento=9001';
        NosAcoes[0] = new infraArvoreAcao("ASSINATURA","","D9001","alert('Assinado por:\nMaria Silva')",null,"Assinaturas","assinatura.svg");
      </script>
    </body></html>"#
    )
}

/// PDF options page with the generation form
pub fn pdf_options_page(proc_id: &str) -> String {
    format!(
        r#"<html><body>
      <form id="frmGerarPdf" action="controlador.php?acao=procedimento_gerar_pdf&id_procedimento={proc_id}" method="post">
        <input type="hidden" name="hdnFlagGerar" value="0">
        <input type="radio" name="rdoTipo" value="T">
        <input type="radio" name="rdoTipo" value="P">
        <input type="submit" name="btnGerar" value="Gerar">
      </form>
    </body></html>"#
    )
}

/// Generation response pointing the download iframe at the rendered file
pub fn pdf_ready_page() -> String {
    r#"<html><body>
      <iframe id="ifrDownload" src="controlador.php?acao=exibir_arquivo&id_arquivo=55"></iframe>
    </body></html>"#
        .to_string()
}

pub const PDF_BYTES: &[u8] = b"%PDF-1.7\nfake portal artifact\n%%EOF";

/// Mount the whole happy-path portal: login, control (desired unit active),
/// one case with documents, PDF generation
pub async fn mount_portal(server: &MockServer, active_unit: &str) {
    Mock::given(method("GET"))
        .and(path("/sip/login.php"))
        .respond_with(html_response(&login_page()))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sip/login.php"))
        .respond_with(html_response(&landing_page()))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sei/controlador.php"))
        .and(query_param("acao", "procedimento_controlar"))
        .respond_with(html_response(&control_page(active_unit)))
        .mount(server)
        .await;
    for proc_id in ["410", "777"] {
        Mock::given(method("GET"))
            .and(path("/sei/controlador.php"))
            .and(query_param("acao", "procedimento_trabalhar"))
            .and(query_param("id_procedimento", proc_id))
            .respond_with(html_response(&case_page(proc_id)))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/sei/controlador.php"))
            .and(query_param("acao", "arvore_visualizar"))
            .and(query_param("id_arvore", proc_id))
            .respond_with(html_response(&tree_page(proc_id)))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/sei/controlador.php"))
            .and(query_param("acao", "procedimento_gerar_pdf"))
            .and(query_param("id_procedimento", proc_id))
            .respond_with(html_response(&pdf_options_page(proc_id)))
            .mount(server)
            .await;
    }
    Mock::given(method("POST"))
        .and(path("/sei/controlador.php"))
        .and(body_string_contains("hdnFlagGerar=1"))
        .respond_with(html_response(&pdf_ready_page()))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sei/controlador.php"))
        .and(query_param("acao", "exibir_arquivo"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(PDF_BYTES, "application/pdf"))
        .mount(server)
        .await;
}
